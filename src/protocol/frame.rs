//! Frame struct with typed accessors.
//!
//! Represents one complete length-prefixed protocol unit.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use native_bridge::protocol::Frame;
//! use bytes::Bytes;
//!
//! let frame = Frame::new(Bytes::from_static(br#"{"type":"getVersion"}"#));
//!
//! assert_eq!(frame.len(), 21);
//! assert_eq!(frame.payload(), br#"{"type":"getVersion"}"#);
//! ```

use bytes::Bytes;

use super::wire_format::{encode_length, LENGTH_PREFIX_SIZE};

/// A complete protocol frame (length prefix already stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from payload bytes.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Create a frame from a byte slice (copies data).
    pub fn from_slice(payload: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length as carried in the prefix.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as UTF-8 text, if valid.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Writes the LE length prefix and appends the payload.
///
/// # Example
///
/// ```
/// use native_bridge::protocol::build_frame;
///
/// let bytes = build_frame(b"{}");
/// assert_eq!(bytes, [2, 0, 0, 0, b'{', b'}']);
/// ```
pub fn build_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&encode_length(payload.len() as u32));
    buf.extend_from_slice(payload);
    buf
}

/// Build frame parts for scatter/gather I/O.
///
/// Returns the encoded prefix and a reference to the payload.
pub fn build_frame_parts(payload: &[u8]) -> ([u8; LENGTH_PREFIX_SIZE], &[u8]) {
    (encode_length(payload.len() as u32), payload)
}
