//! Best-effort resynchronization after stream corruption.
//!
//! Some browser transports push the host's binary output through a text
//! decoder. Any invalid byte sequence in a length prefix then comes out as
//! the replacement marker `EF BF BD`, and the real prefix is gone. The
//! decoder cannot know where the next frame starts, so this step guesses:
//!
//! 1. Skip the marker and any zero bytes right after it (or, for a plain bad
//!    prefix, the first byte).
//! 2. Look at the next [`RESYNC_SCAN_LIMIT`] offsets for a small non-zero LE
//!    length immediately followed by `{`.
//! 3. Realign the buffer there, or give up and drop everything buffered.
//!
//! This is lossy. Whatever frame the corrupted prefix belonged to is lost,
//! and a false match inside garbage is possible. It never fails: every call
//! ends in [`ResyncOutcome::Resynced`], [`ResyncOutcome::Waiting`] or
//! [`ResyncOutcome::Reset`].

use bytes::{Buf, BytesMut};

use super::wire_format::{decode_length, starts_with_marker, LENGTH_PREFIX_SIZE, REPLACEMENT_MARKER};

/// Number of candidate offsets examined after the corrupt head.
pub const RESYNC_SCAN_LIMIT: usize = 10;

/// Largest length accepted as a plausible frame start while scanning.
pub const RESYNC_MAX_LENGTH: u32 = 64 * 1024;

/// Result of one resynchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// A complete frame now starts at the buffer head.
    Resynced { skipped: usize },
    /// A plausible frame start was found (or the scan window is not fully
    /// buffered yet); more data is needed.
    Waiting { skipped: usize },
    /// Nothing plausible in the window; the buffer was cleared.
    Reset { discarded: usize },
}

/// Try to realign `buffer` on the next plausible frame start.
///
/// Call only when the length prefix at the head of `buffer` is invalid.
/// `max_frame` caps the plausible length in addition to [`RESYNC_MAX_LENGTH`].
pub fn resynchronize(buffer: &mut BytesMut, max_frame: u32) -> ResyncOutcome {
    let start = corrupt_head_len(buffer);
    let plausible_max = RESYNC_MAX_LENGTH.min(max_frame);

    for offset in start..start + RESYNC_SCAN_LIMIT {
        let Some(candidate) = buffer.get(offset..offset + LENGTH_PREFIX_SIZE + 1) else {
            // Window not fully buffered; rescan once more bytes arrive.
            return ResyncOutcome::Waiting { skipped: 0 };
        };

        let length = decode_length(candidate).unwrap_or(0);
        if length == 0 || length > plausible_max || candidate[LENGTH_PREFIX_SIZE] != b'{' {
            continue;
        }

        let complete = buffer.len() >= offset + LENGTH_PREFIX_SIZE + length as usize;
        buffer.advance(offset);
        return if complete {
            ResyncOutcome::Resynced { skipped: offset }
        } else {
            ResyncOutcome::Waiting { skipped: offset }
        };
    }

    let discarded = buffer.len();
    buffer.clear();
    ResyncOutcome::Reset { discarded }
}

/// Number of bytes at the head that are certainly not part of a frame.
fn corrupt_head_len(buffer: &[u8]) -> usize {
    if !starts_with_marker(buffer) {
        return 1;
    }

    let zeros = buffer[REPLACEMENT_MARKER.len()..]
        .iter()
        .take_while(|&&b| b == 0)
        .count();
    REPLACEMENT_MARKER.len() + zeros
}
