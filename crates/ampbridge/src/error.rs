//! Error taxonomy for the buffer protocol.

use std::time::Duration;

use thiserror::Error;

use crate::memory::BufferRole;

/// Errors that can occur while driving a transform call across the bridge.
///
/// Buffer-protocol errors never silently truncate or wrap around: every
/// failure aborts the current call only, and the caller decides whether to
/// skip the input or tear the session down.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Caller-provided input exceeds the configured maximum for its buffer.
    ///
    /// Reported before any buffer mutation; recoverable, the caller should
    /// skip or truncate.
    #[error("{role} input of {len} bytes exceeds the {max}-byte limit")]
    InputTooLarge {
        /// Buffer the input was destined for.
        role: BufferRole,
        /// UTF-8 byte length of the offending input.
        len: usize,
        /// Configured maximum payload length.
        max: usize,
    },

    /// An encoded payload would not fit the buffer it is destined for.
    ///
    /// Detected at encode time, before the buffer is touched.
    #[error("{role} payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge {
        /// Buffer the payload was destined for.
        role: BufferRole,
        /// UTF-8 byte length of the encoded payload.
        len: usize,
        /// Configured maximum payload length.
        max: usize,
    },

    /// A length prefix claims more bytes than the buffer may hold.
    ///
    /// Indicates protocol desynchronization or a stale view that slipped
    /// past detection. Fatal for the current call.
    #[error("{role} buffer is corrupted: length prefix claims {claimed} bytes (limit {max})")]
    CorruptedBuffer {
        /// Buffer the prefix was read from.
        role: BufferRole,
        /// Payload length the prefix claims.
        claimed: usize,
        /// Maximum the claim was validated against.
        max: usize,
    },

    /// Bytes read from a buffer do not form valid UTF-8.
    ///
    /// Fatal: this indicates a protocol or module defect, not a caller
    /// error.
    #[error("{role} buffer does not contain valid UTF-8")]
    DecodeError {
        /// Buffer the bytes were read from.
        role: BufferRole,
        /// Underlying UTF-8 validation failure.
        #[source]
        source: std::str::Utf8Error,
    },

    /// The buffer capability failed to produce a usable memory view.
    #[error("no memory view available for the {role} buffer")]
    ViewUnavailable {
        /// Buffer whose capability failed.
        role: BufferRole,
    },

    /// A memory view is smaller than the frame that must be written into it.
    #[error("{role} view of {len} bytes cannot hold a {needed}-byte frame")]
    ViewTooSmall {
        /// Buffer the frame was destined for.
        role: BufferRole,
        /// Frame size including the length prefix.
        needed: usize,
        /// Actual view size.
        len: usize,
    },

    /// The module reported an abnormal completion.
    #[error("transform failed inside the module: {reason}")]
    TransformFailed {
        /// Reason the module gave, or a description of how it went silent.
        reason: String,
    },

    /// The module did not signal completion within the configured deadline.
    ///
    /// The module's own state is undefined afterwards; the owning session
    /// becomes unusable and should be torn down rather than reused.
    #[error("transform did not complete within {timeout:?}")]
    Timeout {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// A transform was started while another one was still in flight.
    ///
    /// The protocol provides no completion token, so calls are strictly
    /// serialized.
    #[error("a transform call is already in flight")]
    CallInProgress,

    /// The session was poisoned by an earlier timed-out call.
    #[error("session is unusable after a timed-out call")]
    SessionUnusable,

    /// Session configuration failed validation.
    #[error("invalid session configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        reason: String,
    },
}

/// A specialized Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
