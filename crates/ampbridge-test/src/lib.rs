//! Shared test fixtures for the ampbridge buffer protocol.
//!
//! Provides an in-process stand-in for the embedded computation unit: a
//! [`FakeMemory`] whose segments relocate on demand (simulating
//! linear-memory growth) and a [`FakeModule`] with scripted behaviors for
//! exercising the happy path, mid-call growth, corruption, abnormal
//! completion and wedged-module timeouts.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::Level;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

mod memory;
mod module;

pub use memory::FakeMemory;
pub use module::{FakeModule, ModuleBehavior};

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct WarnCounter {
    warnings: Arc<AtomicUsize>,
}

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Count WARN-level events emitted on the current thread while the
/// returned guard is alive.
///
/// Installs a thread-local default subscriber, shadowing whatever
/// [`init_tracing`] set up globally; tests assert on the counter to check
/// that a diagnostic actually fired (or that none did).
#[must_use]
pub fn capture_warnings() -> (tracing::subscriber::DefaultGuard, Arc<AtomicUsize>) {
    let warnings = Arc::new(AtomicUsize::new(0));
    let layer = WarnCounter {
        warnings: Arc::clone(&warnings),
    };
    let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));
    (guard, warnings)
}
