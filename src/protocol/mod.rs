//! Protocol module - wire format, framing, and corruption recovery.
//!
//! This module implements the native messaging framing:
//! - 4-byte little-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Resync step for streams whose prefixes were mangled in transit

mod frame;
mod frame_buffer;
mod resync;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, Frame};
pub use frame_buffer::{DecoderStats, FrameBuffer};
pub use resync::{resynchronize, ResyncOutcome, RESYNC_MAX_LENGTH, RESYNC_SCAN_LIMIT};
pub use wire_format::{
    decode_length, encode_length, starts_with_marker, validate_length, LENGTH_PREFIX_SIZE,
    MAX_FRAME_SIZE, REPLACEMENT_MARKER,
};
