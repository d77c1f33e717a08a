//! Memory views over the module's relocatable linear memory.
//!
//! The embedded computation unit owns a single contiguous, growable memory
//! region. The host never holds a raw pointer into it; instead it holds a
//! [`MemoryView`] handed out by a [`ViewSource`] capability. Whenever the
//! module grows its memory the region is relocated and every outstanding
//! view becomes stale. Rather than sniffing for the side effects of
//! relocation (the original convention was "the view's length collapses to
//! zero"), each view carries the generation of the memory it was cut from;
//! a mismatch against the capability's current generation is the staleness
//! signal.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::error::BridgeResult;

/// The three buffers the bridge exchanges payloads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Input buffer holding the document URL.
    UrlIn,
    /// Input buffer holding the document HTML.
    HtmlIn,
    /// Output buffer the module writes the transformed HTML into.
    HtmlOut,
}

impl BufferRole {
    /// Stable name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UrlIn => "url-in",
            Self::HtmlIn => "html-in",
            Self::HtmlOut => "html-out",
        }
    }
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One relocatable segment of the module's linear memory, as shared with
/// the host.
pub type SharedSegment = Arc<RwLock<Box<[u8]>>>;

/// A byte-addressable window over one region of the module's linear
/// memory.
///
/// A view is exclusively held by one [`SharedBuffer`](crate::buffer::SharedBuffer)
/// at a time while in use, and must be handed back through
/// [`ViewSource::release`] before a fresh one is acquired. It never grows:
/// after a relocation the stale view keeps referring to the old region,
/// which must no longer be read or written.
#[derive(Clone)]
pub struct MemoryView {
    segment: SharedSegment,
    generation: u64,
}

impl MemoryView {
    /// Wrap a segment handed out by the module at the given memory
    /// generation.
    #[must_use]
    pub fn new(segment: SharedSegment, generation: u64) -> Self {
        Self {
            segment,
            generation,
        }
    }

    /// Generation of the linear memory this view was cut from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Size of the viewed region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Whether the viewed region is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `len` bytes starting at `offset` out of the view.
    ///
    /// Returns `None` if the requested range falls outside the view; the
    /// caller maps that to a protocol error with buffer context.
    #[must_use]
    pub fn read(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        self.read_lock().get(offset..end).map(<[u8]>::to_vec)
    }

    /// Write `data` into the view starting at `offset`, overwriting prior
    /// content in place.
    ///
    /// Returns `false` without writing anything if the range falls outside
    /// the view.
    #[must_use]
    pub fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        let mut bytes = self.segment.write().unwrap_or_else(|e| {
            warn!("memory segment write lock poisoned, recovering");
            PoisonError::into_inner(e)
        });
        match bytes.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, Box<[u8]>> {
        self.segment.read().unwrap_or_else(|e| {
            warn!("memory segment read lock poisoned, recovering");
            PoisonError::into_inner(e)
        })
    }
}

impl fmt::Debug for MemoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryView")
            .field("generation", &self.generation)
            .field("len", &self.len())
            .finish()
    }
}

/// The opaque capability that yields memory views for one buffer.
///
/// Implemented by the adapter that embeds the computation unit. It must be
/// callable repeatedly and must hand out a fresh view after any
/// memory-growth event. `Debug` is required so the buffer handles holding
/// a capability stay debuggable.
#[async_trait]
pub trait ViewSource: Send + Sync + fmt::Debug {
    /// Current generation of the module's linear memory.
    ///
    /// Bumped on every relocation. A [`MemoryView`] whose generation no
    /// longer matches is stale.
    fn generation(&self) -> u64;

    /// Acquire a fresh view over this buffer's current region.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ViewUnavailable`](crate::error::BridgeError::ViewUnavailable)
    /// if the module cannot hand out a view for this buffer.
    async fn acquire(&self) -> BridgeResult<MemoryView>;

    /// Release a previously acquired view.
    ///
    /// Awaited before a replacement is acquired: the module may be waiting
    /// for the host to let go of the old region before it can safely grow
    /// memory.
    async fn release(&self, view: MemoryView);
}
