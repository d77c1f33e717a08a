//! Boundary to the embedded computation unit.
//!
//! The unit itself is a black box `transform(url, html) -> html` running
//! inside an embedded VM; the bridge consumes exactly three things from
//! whatever adapter embeds it: a per-buffer view capability, a call
//! trigger, and the promise that the completion it is handed is consumed
//! exactly once per call.

use std::sync::Arc;

use crate::call::Completion;
use crate::memory::{BufferRole, ViewSource};

/// Interface the bridge consumes from the embedded computation unit.
///
/// Implementations wrap a concrete VM instance. One instance serves one
/// [`Session`](crate::session::Session); callers needing throughput run
/// multiple independent instances rather than share one.
pub trait TransformModule: Send + Sync {
    /// Capability yielding memory views over the buffer for `role`.
    ///
    /// Must be callable repeatedly and must hand out a fresh view after
    /// any memory-growth event.
    fn buffer_source(&self, role: BufferRole) -> Arc<dyn ViewSource>;

    /// Start one transform.
    ///
    /// Module-side this reads the current contents of the input buffers,
    /// transforms them, writes the framed result into the output buffer
    /// and then consumes `completion` exactly once. The host suspends on
    /// the completion and reads the output buffer only after it fires.
    fn begin_transform(&self, completion: Completion);
}
