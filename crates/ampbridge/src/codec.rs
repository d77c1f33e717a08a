//! Length-prefixed framing codec.
//!
//! A frame is a 4-byte big-endian `u32` length prefix followed by exactly
//! that many bytes of UTF-8 text, written into a fixed-size buffer. The
//! functions here are pure and hold no shared state; validation against a
//! buffer's configured maximum happens in [`crate::buffer::SharedBuffer`].

use thiserror::Error;

/// Width of the length prefix, in bytes.
pub const LEN_PREFIX: usize = 4;

/// Errors produced by the pure framing functions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer is too short to hold a length prefix at all.
    #[error("buffer of {len} bytes is too short for a {LEN_PREFIX}-byte length prefix")]
    PrefixTruncated {
        /// Actual buffer length.
        len: usize,
    },

    /// The length prefix claims more payload bytes than are present.
    ///
    /// Defends against a prefix that would otherwise cause a read past the
    /// end of the buffer.
    #[error("length prefix claims {claimed} bytes but only {available} are present")]
    LengthExceedsData {
        /// Payload length the prefix claims.
        claimed: usize,
        /// Bytes actually present after the prefix.
        available: usize,
    },

    /// The payload does not fit in a `u32` length prefix.
    #[error("payload of {len} bytes does not fit a 4-byte length prefix")]
    PayloadTooLong {
        /// UTF-8 byte length of the payload.
        len: usize,
    },

    /// The payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),
}

/// Encode `text` as a length-prefixed frame.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLong`] if the UTF-8 byte length of
/// `text` does not fit in the 4-byte prefix.
pub fn encode_frame(text: &str) -> Result<Vec<u8>, FrameError> {
    let payload = text.as_bytes();
    let len = u32::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLong { len: payload.len() })?;
    let mut frame = Vec::with_capacity(LEN_PREFIX.saturating_add(payload.len()));
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read the payload length a frame claims, without touching the payload.
///
/// # Errors
///
/// Returns [`FrameError::PrefixTruncated`] if `bytes` is shorter than the
/// prefix itself.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FrameError> {
    let prefix: [u8; LEN_PREFIX] = bytes
        .get(..LEN_PREFIX)
        .and_then(|s| s.try_into().ok())
        .ok_or(FrameError::PrefixTruncated { len: bytes.len() })?;
    Ok(prefix_to_usize(u32::from_be_bytes(prefix)))
}

/// Decode a length-prefixed frame back into text.
///
/// The claimed length is validated against the slice's actual remaining
/// size before any payload byte is read.
///
/// # Errors
///
/// Returns [`FrameError::PrefixTruncated`], [`FrameError::LengthExceedsData`]
/// or [`FrameError::InvalidUtf8`].
pub fn decode_frame(bytes: &[u8]) -> Result<String, FrameError> {
    let claimed = frame_len(bytes)?;
    let available = bytes.len().saturating_sub(LEN_PREFIX);
    if claimed > available {
        return Err(FrameError::LengthExceedsData { claimed, available });
    }
    let end = LEN_PREFIX.saturating_add(claimed);
    let payload = bytes
        .get(LEN_PREFIX..end)
        .ok_or(FrameError::LengthExceedsData { claimed, available })?;
    let text = std::str::from_utf8(payload).map_err(FrameError::InvalidUtf8)?;
    Ok(text.to_owned())
}

/// On targets where `usize` is narrower than `u32` the claim saturates;
/// it is then rejected against the buffer size either way.
fn prefix_to_usize(raw: u32) -> usize {
    usize::try_from(raw).unwrap_or(usize::MAX)
}
