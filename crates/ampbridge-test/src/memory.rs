//! Relocatable linear-memory simulation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::trace;

use ampbridge::codec::{self, FrameError, LEN_PREFIX};
use ampbridge::memory::{BufferRole, MemoryView, SharedSegment, ViewSource};
use ampbridge::session::SessionConfig;
use ampbridge::BridgeResult;

/// Per-role acquire/release bookkeeping.
#[derive(Debug, Default, Clone, Copy)]
struct RoleStats {
    acquires: u64,
    releases: u64,
    outstanding: u64,
    /// Times the host acquired a fresh view without releasing the old one
    /// first. The real module may block on that release to grow memory,
    /// so any nonzero count is a protocol violation.
    violations: u64,
}

/// A fake of the module's linear memory: three framed segments plus a
/// module-wide generation counter.
///
/// [`grow`](FakeMemory::grow) relocates every segment (fresh allocations,
/// contents copied, generation bumped), which is exactly what the host
/// observes when the real module's allocator grows its memory.
#[derive(Debug)]
pub struct FakeMemory {
    generation: AtomicU64,
    capacities: HashMap<BufferRole, usize>,
    segments: Mutex<HashMap<BufferRole, SharedSegment>>,
    stats: Mutex<HashMap<BufferRole, RoleStats>>,
}

impl FakeMemory {
    /// Allocate segments sized `max + LEN_PREFIX` for each role.
    #[must_use]
    pub fn new(max_url_len: usize, max_html_len: usize, max_output_len: usize) -> Arc<Self> {
        let capacities: HashMap<BufferRole, usize> = [
            (BufferRole::UrlIn, max_url_len),
            (BufferRole::HtmlIn, max_html_len),
            (BufferRole::HtmlOut, max_output_len),
        ]
        .into_iter()
        .collect();
        let segments = capacities
            .iter()
            .map(|(&role, &max)| (role, fresh_segment(max)))
            .collect();
        Arc::new(Self {
            generation: AtomicU64::new(0),
            capacities,
            segments: Mutex::new(segments),
            stats: Mutex::new(HashMap::new()),
        })
    }

    /// Allocate segments matching a session configuration.
    #[must_use]
    pub fn for_config(config: &SessionConfig) -> Arc<Self> {
        Self::new(
            config.max_url_len,
            config.max_html_len,
            config.max_output_len,
        )
    }

    /// Current memory generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Relocate all segments, as the module's allocator does on growth.
    ///
    /// Contents are copied so in-flight payloads survive; every view cut
    /// from the previous generation is stale afterwards.
    pub fn grow(&self) {
        let mut segments = lock(&self.segments);
        for (&role, &max) in &self.capacities {
            let replacement = fresh_segment(max);
            if let Some(old) = segments.get(&role) {
                let old_bytes = lock_read(old);
                let mut new_bytes = lock_write(&replacement);
                let len = old_bytes.len().min(new_bytes.len());
                if let (Some(dst), Some(src)) =
                    (new_bytes.get_mut(..len), old_bytes.get(..len))
                {
                    dst.copy_from_slice(src);
                }
            }
            segments.insert(role, replacement);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        trace!(generation, "fake linear memory relocated");
    }

    /// The capability for `role`, as handed to the bridge.
    #[must_use]
    pub fn source(self: &Arc<Self>, role: BufferRole) -> Arc<dyn ViewSource> {
        Arc::new(FakeSource {
            memory: Arc::clone(self),
            role,
        })
    }

    /// The current segment backing `role` (module-side access).
    #[must_use]
    pub fn segment(&self, role: BufferRole) -> SharedSegment {
        lock(&self.segments)
            .get(&role)
            .cloned()
            .unwrap_or_else(|| fresh_segment(0))
    }

    /// Module-side write of a framed payload into `role`'s segment.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LengthExceedsData`] if the frame does not fit
    /// the segment.
    pub fn write_frame(&self, role: BufferRole, text: &str) -> Result<(), FrameError> {
        let frame = codec::encode_frame(text)?;
        let segment = self.segment(role);
        let mut bytes = lock_write(&segment);
        match bytes.get_mut(..frame.len()) {
            Some(dst) => {
                dst.copy_from_slice(&frame);
                Ok(())
            }
            None => Err(FrameError::LengthExceedsData {
                claimed: frame.len().saturating_sub(LEN_PREFIX),
                available: bytes.len().saturating_sub(LEN_PREFIX),
            }),
        }
    }

    /// Module-side read of the framed payload in `role`'s segment.
    ///
    /// # Errors
    ///
    /// Propagates framing errors from [`codec::decode_frame`].
    pub fn read_frame(&self, role: BufferRole) -> Result<String, FrameError> {
        let segment = self.segment(role);
        let bytes = lock_read(&segment);
        codec::decode_frame(&bytes)
    }

    /// Forge the raw length prefix of `role`'s segment. Used to simulate
    /// a desynchronized or corrupted buffer.
    pub fn write_raw_prefix(&self, role: BufferRole, claimed: u32) {
        let segment = self.segment(role);
        let mut bytes = lock_write(&segment);
        if let Some(dst) = bytes.get_mut(..LEN_PREFIX) {
            dst.copy_from_slice(&claimed.to_be_bytes());
        }
    }

    /// Times the host acquired a view for `role`.
    #[must_use]
    pub fn acquire_count(&self, role: BufferRole) -> u64 {
        lock(&self.stats).get(&role).map_or(0, |s| s.acquires)
    }

    /// Times the host released a view for `role`.
    #[must_use]
    pub fn release_count(&self, role: BufferRole) -> u64 {
        lock(&self.stats).get(&role).map_or(0, |s| s.releases)
    }

    /// Times the host re-acquired a view for `role` without releasing the
    /// previous one first.
    #[must_use]
    pub fn release_violations(&self, role: BufferRole) -> u64 {
        lock(&self.stats).get(&role).map_or(0, |s| s.violations)
    }
}

/// Capability over one fake buffer.
#[derive(Debug)]
struct FakeSource {
    memory: Arc<FakeMemory>,
    role: BufferRole,
}

#[async_trait]
impl ViewSource for FakeSource {
    fn generation(&self) -> u64 {
        self.memory.generation()
    }

    async fn acquire(&self) -> BridgeResult<MemoryView> {
        let generation = self.memory.generation();
        let segment = self.memory.segment(self.role);
        let mut stats = lock(&self.memory.stats);
        let entry = stats.entry(self.role).or_default();
        if entry.outstanding > 0 {
            entry.violations = entry.violations.saturating_add(1);
        }
        entry.outstanding = entry.outstanding.saturating_add(1);
        entry.acquires = entry.acquires.saturating_add(1);
        Ok(MemoryView::new(segment, generation))
    }

    async fn release(&self, view: MemoryView) {
        drop(view);
        let mut stats = lock(&self.memory.stats);
        let entry = stats.entry(self.role).or_default();
        entry.outstanding = entry.outstanding.saturating_sub(1);
        entry.releases = entry.releases.saturating_add(1);
    }
}

fn fresh_segment(max: usize) -> SharedSegment {
    Arc::new(RwLock::new(
        vec![0u8; max.saturating_add(LEN_PREFIX)].into_boxed_slice(),
    ))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn lock_read(segment: &SharedSegment) -> std::sync::RwLockReadGuard<'_, Box<[u8]>> {
    segment.read().unwrap_or_else(PoisonError::into_inner)
}

fn lock_write(segment: &SharedSegment) -> std::sync::RwLockWriteGuard<'_, Box<[u8]>> {
    segment.write().unwrap_or_else(PoisonError::into_inner)
}
