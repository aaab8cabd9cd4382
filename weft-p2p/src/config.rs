//! Host configuration and protocol constants.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Magic prefix stamped on every framed packet.
pub const PACKET_MAGIC: [u8; 4] = [0x22, 0x40, 0x08, 0x91];

/// Basic peer network protocol version.
pub const PROTOCOL_VERSION: u32 = 3;

/// Maximum framed packet size accepted from the wire (16 MiB).
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// First packet id available to registered capabilities; ids below this are
/// reserved for the base session protocol.
pub const USER_PACKET_BASE: u8 = 0x10;

/// Interval between scheduler ticks while the network is running.
pub const TIMER_INTERVAL: Duration = Duration::from_millis(100);

/// Interval at which the scheduler pings all live sessions.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period after a ping before unresponsive sessions are dropped.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default target number of simultaneously connected peers.
pub const DEFAULT_IDEAL_PEER_COUNT: usize = 5;

/// Only peers that connected within this window are persisted.
pub const RECENT_PEER_WINDOW: Duration = Duration::from_secs(48 * 3600);

/// Advertised ports outside this range are recorded with a warning.
pub const ADVERTISED_PORT_RANGE: RangeInclusive<u16> = 30300..=30305;

/// Ports at or above this are treated as ephemeral and never advertised.
pub const PRIVATE_PORT_THRESHOLD: u16 = 32768;

/// Default TCP listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 30303;

/// Network settings for the host.
#[derive(Debug, Clone)]
pub struct NetworkPreferences {
    /// TCP port to listen on; 0 asks the OS for an ephemeral port.
    pub listen_port: u16,

    /// Explicit public address override, if any.
    pub public_ip: Option<String>,

    /// Whether to attempt NAT traversal when no public address is found.
    pub upnp: bool,

    /// Whether private-range addresses are acceptable as peer endpoints.
    pub local_networking: bool,

    /// Directory holding the host identity file.
    pub data_dir: PathBuf,

    /// Version string advertised for this client.
    pub client_version: String,
}

impl Default for NetworkPreferences {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            public_ip: None,
            upnp: true,
            local_networking: false,
            data_dir: PathBuf::from("."),
            client_version: concat!("weft/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl NetworkPreferences {
    /// Set the listen port.
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Set an explicit public address.
    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self
    }

    /// Enable or disable NAT traversal.
    pub fn with_upnp(mut self, upnp: bool) -> Self {
        self.upnp = upnp;
        self
    }

    /// Accept private-range addresses as peer endpoints.
    pub fn with_local_networking(mut self, enabled: bool) -> Self {
        self.local_networking = enabled;
        self
    }

    /// Set the data directory holding the host identity file.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Set the advertised client version string.
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }
}

/// Default reconnect host for a client version string: `poc-<minor>.ethdev.com`,
/// where `<minor>` is the second dot-separated field of the version.
pub fn poc_host(client_version: &str) -> String {
    let minor = client_version.split('.').nth(1).unwrap_or("0");
    format!("poc-{minor}.ethdev.com")
}

/// Apply the advertised-port policy: warn on non-standard ports, clear
/// ephemeral-range ports entirely.
pub fn sanitize_advertised_port(port: u16) -> u16 {
    if !ADVERTISED_PORT_RANGE.contains(&port) {
        tracing::warn!(port, "non-standard port being recorded");
    }
    if port >= PRIVATE_PORT_THRESHOLD {
        tracing::warn!(port, "private port being recorded, clearing to 0");
        return 0;
    }
    port
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences() {
        let prefs = NetworkPreferences::default();
        assert_eq!(prefs.listen_port, DEFAULT_LISTEN_PORT);
        assert!(prefs.public_ip.is_none());
        assert!(!prefs.local_networking);
    }

    #[test]
    fn test_preferences_builder() {
        let prefs = NetworkPreferences::default()
            .with_listen_port(30301)
            .with_public_ip("198.51.100.4")
            .with_local_networking(true)
            .with_client_version("weft/0.9.23");

        assert_eq!(prefs.listen_port, 30301);
        assert_eq!(prefs.public_ip.as_deref(), Some("198.51.100.4"));
        assert!(prefs.local_networking);
        assert_eq!(prefs.client_version, "weft/0.9.23");
    }

    #[test]
    fn test_poc_host() {
        assert_eq!(poc_host("0.9.23"), "poc-9.ethdev.com");
        assert_eq!(poc_host("1.12.0"), "poc-12.ethdev.com");
        // Degenerate version strings fall back to minor 0
        assert_eq!(poc_host("nodots"), "poc-0.ethdev.com");
    }

    #[test]
    fn test_sanitize_advertised_port() {
        assert_eq!(sanitize_advertised_port(30303), 30303);
        // Out of the standard range but below the ephemeral threshold: kept
        assert_eq!(sanitize_advertised_port(31000), 31000);
        // Ephemeral range: cleared
        assert_eq!(sanitize_advertised_port(32768), 0);
        assert_eq!(sanitize_advertised_port(49152), 0);
    }
}
