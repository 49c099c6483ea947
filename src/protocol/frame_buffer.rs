//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 4 bytes
//! - `WaitingForPayload`: Prefix parsed, need N more payload bytes
//!
//! An invalid prefix (zero, or above the frame limit) never produces an
//! error. The buffer hands the head over to [`resynchronize`] and keeps
//! going with whatever it recovers.
//!
//! # Example
//!
//! ```
//! use native_bridge::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(br#"{"type":"getVersion"}"#);
//!
//! // Data arrives in chunks from stdin
//! assert!(buffer.push(&bytes[..3]).is_empty());
//! let frames = buffer.push(&bytes[3..]);
//!
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::{Buf, BytesMut};

use super::resync::{resynchronize, ResyncOutcome};
use super::wire_format::{decode_length, validate_length, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
use super::Frame;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix (need 4 bytes).
    WaitingForHeader,
    /// Prefix consumed, waiting for payload bytes.
    WaitingForPayload { length: u32 },
}

/// Counters for corruption handling, exposed for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames emitted.
    pub frames: u64,
    /// Successful realignments.
    pub resyncs: u64,
    /// Buffer resets after unrecoverable corruption.
    pub resets: u64,
    /// Bytes dropped while realigning or resetting.
    pub dropped_bytes: u64,
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
pub struct FrameBuffer {
    /// Accumulated bytes from stdin reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_frame_size: u32,
    /// Corruption counters.
    stats: DecoderStats,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 10 MiB.
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max payload size.
    ///
    /// The limit is clamped to `1..=MAX_FRAME_SIZE`.
    pub fn with_max_frame(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_frame_size: max_frame_size.clamp(1, MAX_FRAME_SIZE),
            stats: DecoderStats::default(),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the frames completed by this chunk, in stream order (may be
    /// empty if still waiting for data). Partial data stays buffered for the
    /// next push. Corruption is handled internally and never surfaces here.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one() {
            frames.push(frame);
        }
        self.stats.frames += frames.len() as u64;

        frames
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Option<Frame> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let length = decode_length(&self.buffer)?;

                    if let Err(e) = validate_length(length, self.max_frame_size) {
                        tracing::debug!(length, "invalid length prefix ({}), resynchronizing", e);
                        if !self.recover() {
                            return None;
                        }
                        continue;
                    }

                    self.buffer.advance(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForPayload { length };
                }

                State::WaitingForPayload { length } => {
                    let length = length as usize;
                    if self.buffer.len() < length {
                        return None;
                    }

                    // Zero-copy freeze of the payload
                    let payload = self.buffer.split_to(length).freeze();
                    self.state = State::WaitingForHeader;

                    return Some(Frame::new(payload));
                }
            }
        }
    }

    /// Run the resync step. Returns `true` if decoding can continue now.
    fn recover(&mut self) -> bool {
        match resynchronize(&mut self.buffer, self.max_frame_size) {
            ResyncOutcome::Resynced { skipped } => {
                self.stats.resyncs += 1;
                self.stats.dropped_bytes += skipped as u64;
                tracing::info!(skipped, "resynchronized input stream");
                true
            }
            ResyncOutcome::Waiting { skipped } => {
                self.stats.dropped_bytes += skipped as u64;
                tracing::trace!(skipped, "waiting for more data to resynchronize");
                false
            }
            ResyncOutcome::Reset { discarded } => {
                self.stats.resets += 1;
                self.stats.dropped_bytes += discarded as u64;
                tracing::warn!(discarded, "could not resynchronize, discarded buffered input");
                false
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum accepted payload size.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Corruption counters since creation (not reset by `clear`).
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, REPLACEMENT_MARKER};

    fn message(n: usize) -> Vec<u8> {
        format!(r#"{{"type":"verifyFolder","path":"/tmp/{}"}}"#, n).into_bytes()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();

        let frames = buffer.push(&build_frame(b"{}"));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"{}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        for n in 0..3 {
            combined.extend(build_frame(&message(n)));
        }

        let frames = buffer.push(&combined);

        assert_eq!(frames.len(), 3);
        for (n, frame) in frames.iter().enumerate() {
            assert_eq!(frame.payload(), &message(n)[..]);
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&message(1));

        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[2..]);
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&message(7));

        let partial_len = LENGTH_PREFIX_SIZE + 10;
        assert!(buffer.push(&bytes[..partial_len]).is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial_len..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &message(7)[..]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&message(3));

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]));
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].payload(), &message(3)[..]);
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let mut stream = Vec::new();
        for n in 0..3 {
            stream.extend(build_frame(&message(n)));
        }

        for first in 0..stream.len() {
            for second in first..stream.len() {
                let mut buffer = FrameBuffer::new();
                let mut frames = buffer.push(&stream[..first]);
                frames.extend(buffer.push(&stream[first..second]));
                frames.extend(buffer.push(&stream[second..]));

                let payloads: Vec<_> = frames.iter().map(|f| f.payload().to_vec()).collect();
                assert_eq!(payloads, vec![message(0), message(1), message(2)]);
                assert!(buffer.is_empty());
            }
        }
    }

    #[test]
    fn test_zero_length_prefix_is_recovered() {
        let mut buffer = FrameBuffer::new();

        let mut data = vec![0, 0, 0, 0];
        data.extend(build_frame(&message(1)));

        let frames = buffer.push(&data);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &message(1)[..]);
        assert_eq!(buffer.stats().resyncs, 1);
    }

    #[test]
    fn test_oversized_prefix_does_not_error() {
        let mut buffer = FrameBuffer::with_max_frame(100);

        let frames = buffer.push(&1000u32.to_le_bytes());
        assert!(frames.is_empty());

        // Garbage after the bad prefix: the window fills and the buffer resets.
        let frames = buffer.push(&[0x41; 16]);
        assert!(frames.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().resets, 1);
    }

    #[test]
    fn test_decoding_continues_after_reset() {
        let mut buffer = FrameBuffer::new();

        let mut garbage = REPLACEMENT_MARKER.to_vec();
        garbage.extend_from_slice(&[0x41; 20]);
        assert!(buffer.push(&garbage).is_empty());
        assert!(buffer.is_empty());

        let frames = buffer.push(&build_frame(&message(9)));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &message(9)[..]);
    }

    #[test]
    fn test_marker_resync_across_chunks() {
        let mut buffer = FrameBuffer::new();

        let mut data = REPLACEMENT_MARKER.to_vec();
        data.extend(build_frame(&message(2)));

        let mut frames = Vec::new();
        for chunk in data.chunks(3) {
            frames.extend(buffer.push(chunk));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &message(2)[..]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().dropped_bytes, 3);
    }

    #[test]
    fn test_marker_then_complete_frame() {
        let mut buffer = FrameBuffer::new();

        let mut data = REPLACEMENT_MARKER.to_vec();
        data.extend(build_frame(&message(4)));

        let frames = buffer.push(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &message(4)[..]);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(&message(1));

        buffer.push(&bytes[..LENGTH_PREFIX_SIZE + 2]);
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForHeader");
        assert!(buffer.is_empty());

        let frames = buffer.push(&bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_max_frame_is_clamped() {
        assert_eq!(FrameBuffer::with_max_frame(0).max_frame_size(), 1);
        assert_eq!(
            FrameBuffer::with_max_frame(u32::MAX).max_frame_size(),
            MAX_FRAME_SIZE
        );
    }
}
