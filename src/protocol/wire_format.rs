//! Wire format encoding and decoding.
//!
//! Every frame is a 4-byte length prefix followed by a UTF-8 JSON payload:
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ Length           │ Payload                      │
//! │ 4 bytes uint32 LE│ `Length` bytes of UTF-8 JSON │
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! The prefix is Little Endian (native byte order of every browser host
//! platform). The same framing is used in both directions.

use crate::error::{BridgeError, Result};

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size (10 MiB).
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Bytes an invalid sequence turns into when binary data is pushed through a
/// text decoder (U+FFFD in UTF-8).
pub const REPLACEMENT_MARKER: [u8; 3] = [0xEF, 0xBF, 0xBD];

/// Encode a payload length as a 4-byte LE prefix.
///
/// # Example
///
/// ```
/// use native_bridge::protocol::encode_length;
///
/// assert_eq!(encode_length(17), [17, 0, 0, 0]);
/// ```
#[inline]
pub fn encode_length(length: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    length.to_le_bytes()
}

/// Decode a LE length prefix from the start of `buf`.
///
/// Returns `None` if fewer than 4 bytes are available.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix))
}

/// Check a length prefix against the framing invariant `1..=max`.
pub fn validate_length(length: u32, max: u32) -> Result<()> {
    if length == 0 {
        return Err(BridgeError::Protocol("zero-length frame".to_string()));
    }
    if length > max {
        return Err(BridgeError::FrameTooLarge {
            size: length as usize,
            max: max as usize,
        });
    }
    Ok(())
}

/// Check whether `buf` begins with the replacement marker.
#[inline]
pub fn starts_with_marker(buf: &[u8]) -> bool {
    buf.starts_with(&REPLACEMENT_MARKER)
}
