//! Codec module - serialization of frame payloads.
//!
//! Native messaging payloads are UTF-8 JSON in both directions, so
//! [`JsonCodec`] is the only codec.
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use native_bridge::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::JsonCodec;
