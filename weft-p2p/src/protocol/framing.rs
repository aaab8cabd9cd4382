//! Length-prefixed packet framing.
//!
//! Every framed packet carries an 8-byte header:
//! - 4 bytes: packet magic
//! - 4 bytes: big-endian length of everything after the header

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{MAX_PACKET_SIZE, PACKET_MAGIC};
use crate::error::{HostError, HostResult};

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Stamp the framing header onto a packet buffer.
///
/// The first eight bytes of `buf` are overwritten with the magic and the
/// big-endian length of the remainder. `buf` must be at least eight bytes.
pub fn seal(buf: &mut [u8]) {
    debug_assert!(buf.len() >= HEADER_SIZE);
    buf[..4].copy_from_slice(&PACKET_MAGIC);
    let len = (buf.len() - HEADER_SIZE) as u32;
    buf[4..8].copy_from_slice(&len.to_be_bytes());
}

/// Frame a packet payload into a sealed buffer.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_SIZE + payload.len()];
    buf[HEADER_SIZE..].copy_from_slice(payload);
    seal(&mut buf);
    buf
}

/// Codec for sealed, length-prefixed packets.
///
/// Decoding yields the raw payload (header stripped); the first payload byte
/// is the packet id.
#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Expected length of the current packet once the header has been read.
    current_length: Option<usize>,
}

impl PacketCodec {
    /// Create a new packet codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = HostError;

    fn decode(&mut self, src: &mut BytesMut) -> HostResult<Option<Self::Item>> {
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let magic: [u8; 4] = src[0..4].try_into().expect("slice length checked");
            if magic != PACKET_MAGIC {
                return Err(HostError::InvalidMagic {
                    expected: PACKET_MAGIC,
                    actual: magic,
                });
            }

            let length = u32::from_be_bytes(src[4..8].try_into().expect("slice length checked"))
                as usize;

            if length > MAX_PACKET_SIZE {
                return Err(HostError::PacketTooLarge {
                    size: length,
                    max: MAX_PACKET_SIZE,
                });
            }

            self.current_length = Some(length);
        }

        let length = self.current_length.unwrap_or_default();

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        self.current_length = None;

        Ok(Some(payload))
    }
}

impl Encoder<Vec<u8>> for PacketCodec {
    type Error = HostError;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> HostResult<()> {
        if payload.len() > MAX_PACKET_SIZE {
            return Err(HostError::PacketTooLarge {
                size: payload.len(),
                max: MAX_PACKET_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_slice(&frame(&payload));
        Ok(())
    }
}
