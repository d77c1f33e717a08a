//! Shared buffer handles layering framing over relocatable memory views.

use std::sync::Arc;

use tracing::trace;

use crate::codec::{self, LEN_PREFIX};
use crate::error::{BridgeError, BridgeResult};
use crate::memory::{BufferRole, MemoryView, ViewSource};

/// One of the three cross-boundary buffers, with framing on top.
///
/// Wraps a role, the maximum payload length allowed for that role, and the
/// most recently acquired [`MemoryView`]. The view is re-validated on
/// every access, not only at acquisition: the module may grow its memory
/// between the handle's last use and the current call, and a stale view
/// must never be read or written.
#[derive(Debug)]
pub struct SharedBuffer {
    role: BufferRole,
    max_len: usize,
    source: Arc<dyn ViewSource>,
    view: Option<MemoryView>,
}

impl SharedBuffer {
    /// Create a handle for `role` backed by the module's capability.
    #[must_use]
    pub fn new(role: BufferRole, max_len: usize, source: Arc<dyn ViewSource>) -> Self {
        Self {
            role,
            max_len,
            source,
            view: None,
        }
    }

    /// Buffer role this handle serves.
    #[must_use]
    pub fn role(&self) -> BufferRole {
        self.role
    }

    /// Maximum payload length this buffer accepts.
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Read the framed payload currently in the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::CorruptedBuffer`] if the length prefix claims
    /// more than the configured maximum or more than the view holds, and
    /// [`BridgeError::DecodeError`] if the payload is not valid UTF-8.
    pub async fn read_framed(&mut self) -> BridgeResult<String> {
        let (role, max_len) = (self.role, self.max_len);
        let view = self.view().await?;

        let header = view
            .read(0, LEN_PREFIX)
            .ok_or(BridgeError::CorruptedBuffer {
                role,
                claimed: 0,
                max: max_len,
            })?;
        let claimed = codec::frame_len(&header).map_err(|_| BridgeError::CorruptedBuffer {
            role,
            claimed: 0,
            max: max_len,
        })?;
        if claimed > max_len {
            return Err(BridgeError::CorruptedBuffer {
                role,
                claimed,
                max: max_len,
            });
        }

        let payload = view
            .read(LEN_PREFIX, claimed)
            .ok_or(BridgeError::CorruptedBuffer {
                role,
                claimed,
                max: view.len().saturating_sub(LEN_PREFIX),
            })?;
        match std::str::from_utf8(&payload) {
            Ok(text) => Ok(text.to_owned()),
            Err(source) => Err(BridgeError::DecodeError { role, source }),
        }
    }

    /// Frame `text` and write it into the buffer, overwriting prior
    /// content in place.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::PayloadTooLarge`] before touching the buffer
    /// if the UTF-8 byte length of `text` exceeds the configured maximum;
    /// no partial write is left behind.
    pub async fn write_framed(&mut self, text: &str) -> BridgeResult<()> {
        let (role, max_len) = (self.role, self.max_len);
        if text.len() > max_len {
            return Err(BridgeError::PayloadTooLarge {
                role,
                len: text.len(),
                max: max_len,
            });
        }
        // The length check above already bounds the payload, so encoding
        // can only fail if max_len itself exceeds the prefix range.
        let frame = codec::encode_frame(text).map_err(|_| BridgeError::PayloadTooLarge {
            role,
            len: text.len(),
            max: max_len,
        })?;

        let view = self.view().await?;
        if view.write(0, &frame) {
            Ok(())
        } else {
            Err(BridgeError::ViewTooSmall {
                role,
                needed: frame.len(),
                len: view.len(),
            })
        }
    }

    /// Hand the cached view back to the capability, if one is held.
    ///
    /// Called at session teardown so the module side can resume.
    pub async fn release(&mut self) {
        if let Some(view) = self.view.take() {
            self.source.release(view).await;
        }
    }

    /// Current valid view, re-fetched from the capability when the handle
    /// has never acquired one or the cached view has gone stale.
    ///
    /// A stale view is released (and the release awaited) before the
    /// replacement is fetched; the module may be blocked on that release
    /// to grow its memory.
    async fn view(&mut self) -> BridgeResult<&MemoryView> {
        let stale = self
            .view
            .as_ref()
            .is_some_and(|v| v.generation() != self.source.generation());
        if stale && let Some(old) = self.view.take() {
            trace!(role = %self.role, generation = old.generation(), "releasing stale memory view");
            self.source.release(old).await;
        }
        if self.view.is_none() {
            let fresh = self.source.acquire().await?;
            trace!(role = %self.role, generation = fresh.generation(), "acquired memory view");
            self.view = Some(fresh);
        }
        match &self.view {
            Some(view) => Ok(view),
            None => Err(BridgeError::ViewUnavailable { role: self.role }),
        }
    }
}
