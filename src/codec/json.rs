//! JSON codec using `serde_json`.
//!
//! Output is compact (no pretty-printing) and always valid UTF-8, which is
//! what the browser side expects inside a frame.
//!
//! # Example
//!
//! ```
//! use native_bridge::codec::JsonCodec;
//! use native_bridge::message::Response;
//!
//! let frame = JsonCodec::encode_frame(&Response::ok(), 1024).unwrap();
//! assert_eq!(&frame[4..], br#"{"success":true}"#);
//! ```

use crate::error::{BridgeError, Result};
use crate::protocol::{build_frame, MAX_FRAME_SIZE};

/// JSON codec for frame payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode a value as a complete frame (prefix + payload).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::FrameTooLarge`] if the payload exceeds `max`
    /// (itself capped at [`MAX_FRAME_SIZE`]).
    pub fn encode_frame<T: serde::Serialize>(value: &T, max: u32) -> Result<Vec<u8>> {
        Self::encode_limited(value, max).map(|payload| build_frame(&payload))
    }

    /// Encode a payload without its prefix, rejecting anything over `max`
    /// (itself capped at [`MAX_FRAME_SIZE`]).
    pub fn encode_limited<T: serde::Serialize>(value: &T, max: u32) -> Result<Vec<u8>> {
        let payload = Self::encode(value)?;
        let max = max.min(MAX_FRAME_SIZE) as usize;
        if payload.len() > max {
            return Err(BridgeError::FrameTooLarge {
                size: payload.len(),
                max,
            });
        }
        Ok(payload)
    }
}
