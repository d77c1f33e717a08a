//! Call synchronization between the host and the module.
//!
//! The module's invocation style is callback-driven: the host starts a
//! transform, the module runs it synchronously and invokes a nullary done
//! callback when the output buffer is valid to read. The two sides share
//! neither a call stack nor a garbage collector, so the bridge adapts the
//! callback into a single-shot completion channel and suspends the caller
//! on it — exactly one suspension point per call.
//!
//! The protocol carries no completion token, so there is no way to match
//! a callback to a call; at most one call may be in flight at a time.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

/// Producer side of the single-shot completion channel, handed to the
/// module when a transform starts.
///
/// The module must consume it exactly once; the consuming methods take
/// `self` by value, so signalling the same call twice is impossible by
/// construction.
#[derive(Debug)]
pub struct Completion {
    tx: oneshot::Sender<Result<(), String>>,
}

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Signal that the transform completed and the output buffer is valid
    /// to read.
    pub fn done(self) {
        // A closed receiver means the call already timed out.
        let _ = self.tx.send(Ok(()));
    }

    /// Signal that the transform aborted inside the module.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

/// State of the single call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No transform is in flight.
    Idle,
    /// A transform has been started and its completion is awaited.
    AwaitingModule,
}

/// Bridges one callback-driven module invocation into a single awaitable
/// unit of work, serializing calls so at most one is outstanding.
#[derive(Debug)]
pub struct CallSynchronizer {
    state: Mutex<CallState>,
    timeout: Option<Duration>,
}

/// Returns the call slot to idle when the invocation finishes, however it
/// finishes — including the invocation future being dropped at its
/// suspension point (a caller racing the call against its own deadline).
struct SlotGuard<'a> {
    state: &'a Mutex<CallState>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| {
            warn!("call slot lock poisoned, recovering");
            PoisonError::into_inner(e)
        }) = CallState::Idle;
    }
}

impl CallSynchronizer {
    /// Create a synchronizer, optionally bounding each call by a deadline.
    ///
    /// Without a deadline a call the module never completes parks the
    /// caller forever, which reproduces the raw protocol.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CallState::Idle),
            timeout,
        }
    }

    /// Current state of the call slot.
    #[must_use]
    pub fn state(&self) -> CallState {
        *self.lock_state()
    }

    /// Start one module call via `start` and suspend until the module
    /// signals completion.
    ///
    /// `start` receives the [`Completion`] to hand across the boundary and
    /// must begin the module-side call before returning; the input buffers
    /// must already be fully written.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::CallInProgress`] if a call is already in flight.
    /// - [`BridgeError::TransformFailed`] if the module signalled an
    ///   abnormal completion or dropped the channel without signalling.
    /// - [`BridgeError::Timeout`] if the configured deadline elapsed. The
    ///   slot returns to idle, but the module may still be running; the
    ///   owning session is expected to consider itself unusable.
    ///
    /// The slot also returns to idle if the returned future is dropped at
    /// its suspension point — a caller wrapping the call in its own
    /// deadline does not wedge the synchronizer.
    ///
    /// No automatic retries: the transform is not proven safe to retry
    /// against a buffer that may be left half-written.
    pub async fn invoke<F>(&self, start: F) -> BridgeResult<()>
    where
        F: FnOnce(Completion),
    {
        {
            let mut state = self.lock_state();
            if *state == CallState::AwaitingModule {
                return Err(BridgeError::CallInProgress);
            }
            *state = CallState::AwaitingModule;
        }
        let _slot = SlotGuard { state: &self.state };

        let (completion, done) = Completion::new();
        start(completion);

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, done).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(timeout = ?limit, "module did not signal completion before the deadline");
                    return Err(BridgeError::Timeout { timeout: limit });
                }
            },
            None => done.await,
        };

        match outcome {
            Ok(Ok(())) => {
                debug!("module signalled completion");
                Ok(())
            }
            Ok(Err(reason)) => Err(BridgeError::TransformFailed { reason }),
            Err(_) => Err(BridgeError::TransformFailed {
                reason: "module dropped the completion channel without signalling".to_owned(),
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("call slot lock poisoned, recovering");
            PoisonError::into_inner(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn completion_resolves_the_call() {
        let sync = CallSynchronizer::new(None);
        sync.invoke(Completion::done).await.unwrap();
        assert_eq!(sync.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn module_failure_surfaces_as_transform_failed() {
        let sync = CallSynchronizer::new(None);
        let err = sync
            .invoke(|completion| completion.fail("out of gas"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::TransformFailed { reason } if reason == "out of gas"
        ));
        assert_eq!(sync.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn dropped_completion_surfaces_as_transform_failed() {
        let sync = CallSynchronizer::new(None);
        let err = sync.invoke(drop).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransformFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_surfaces_as_timeout() {
        let sync = CallSynchronizer::new(Some(Duration::from_secs(5)));
        let err = sync
            .invoke(|completion| {
                // Park the completion forever, like a wedged module.
                tokio::spawn(async move {
                    let _keep = completion;
                    std::future::pending::<()>().await;
                });
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert_eq!(sync.state(), CallState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_invoke_returns_the_slot_to_idle() {
        let sync = CallSynchronizer::new(None);
        let slot: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));

        // The caller abandons the call at its suspension point, as when
        // racing the transform against a deadline of its own.
        let stash = Arc::clone(&slot);
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            sync.invoke(move |completion| {
                *stash.lock().unwrap() = Some(completion);
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(sync.state(), CallState::Idle);

        // The module finishing the abandoned call is a no-op.
        slot.lock().unwrap().take().unwrap().done();

        // The slot accepts the next call.
        sync.invoke(Completion::done).await.unwrap();
        assert_eq!(sync.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn second_invoke_while_awaiting_is_rejected() {
        let sync = Arc::new(CallSynchronizer::new(None));
        let slot: Arc<Mutex<Option<Completion>>> = Arc::new(Mutex::new(None));

        let task = {
            let sync = Arc::clone(&sync);
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                sync.invoke(move |completion| {
                    *slot.lock().unwrap() = Some(completion);
                })
                .await
            })
        };
        while slot.lock().unwrap().is_none() {
            tokio::task::yield_now().await;
        }

        assert_eq!(sync.state(), CallState::AwaitingModule);
        let err = sync.invoke(|_| {}).await.unwrap_err();
        assert!(matches!(err, BridgeError::CallInProgress));

        let completion = slot.lock().unwrap().take().unwrap();
        completion.done();
        task.await.unwrap().unwrap();
        assert_eq!(sync.state(), CallState::Idle);
    }
}
