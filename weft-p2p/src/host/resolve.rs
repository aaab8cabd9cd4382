//! Hostname resolution feeding the discovery layer.

use std::net::IpAddr;

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolve a hostname to its first address.
///
/// Failures are logged and swallowed; callers treat `None` as "node never
/// materialised".
pub(crate) async fn resolve_host(host: &str) -> Option<IpAddr> {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    match resolver.lookup_ip(host).await {
        Ok(lookup) => lookup.iter().next(),
        Err(e) => {
            tracing::warn!(host, error = %e, "hostname resolution failed");
            None
        }
    }
}
