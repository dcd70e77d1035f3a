// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Serializes arbitrary concurrent callbacks into a monotonically increasing integer
//! sequence. See [`OrderedSynchronizer`].

use std::{future::Future, sync::Arc};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, trace, warn};

/// Errors raised by [`OrderedSynchronizer::put`].
#[derive(Debug, Error, Clone)]
pub enum OrderedSyncError {
    /// The synchronizer was closed (via [`OrderedSynchronizer::close`]) while a caller
    /// was waiting for its sequence number, or before it could call `put` at all.
    #[error("ordered synchronizer closed: {reason}")]
    Closed { reason: String },

    /// The user-supplied callback itself failed. The sequence still advanced - see
    /// [`OrderedSynchronizer::put`] for why a failing stage must never wedge the
    /// pipeline.
    #[error("callback for sequence {sequence} failed: {message}")]
    CallbackFailed { sequence: u64, message: String },
}

/// One callback failure, forwarded to the *coordinating task* - the task that created
/// the [`OrderedSynchronizer`] - via [`OrderedSynchronizer::new`]'s returned
/// [`FaultReceiver`]. There is no way to raise an exception on another task in Rust, so
/// the failure is carried as a plain value over a channel instead.
#[derive(Debug, Clone)]
pub struct CallbackFault {
    pub sequence: u64,
    pub message: String,
}

/// Receives [`CallbackFault`]s raised by callbacks run through [`OrderedSynchronizer::put`].
/// Held by whichever task created the synchronizer; dropping it just means faults are
/// discarded after the immediate caller of `put` already observed the same error.
pub type FaultReceiver = mpsc::UnboundedReceiver<CallbackFault>;

struct State {
    current: u64,
    closed: Option<Arc<OrderedSyncError>>,
}

/// Serializes arbitrary concurrent callbacks into a total order by integer sequence.
///
/// # Summary
/// - `put(i, f)` blocks the caller until the internal sequence equals `i`, runs `f`
///   while still holding the internal lock (the one primitive in this crate that does
///   so by design - see below), then advances the sequence and wakes every other
///   waiter to re-check its own predicate.
/// - `reset` rewinds the sequence and clears `closed`, non-destructively: parked waiters
///   are not cancelled, they just re-check on the next wake.
/// - `close` latches the synchronizer closed; every current and future waiter observes
///   [`OrderedSyncError::Closed`].
///
/// Holding the lock across `f`'s execution is the single deliberate exception to this
/// crate's usual rule of never awaiting while holding an internal mutex - it is the
/// entire point of the primitive: calls *are* serialized through that held lock.
#[derive(Debug)]
pub struct OrderedSynchronizer {
    state: Mutex<State>,
    notify: Notify,
    fault_tx: mpsc::UnboundedSender<CallbackFault>,
}

impl OrderedSynchronizer {
    /// Creates a synchronizer whose first runnable sequence is `start` (callers
    /// typically pass `1`). Returns the paired [`FaultReceiver`] for the coordinating
    /// task.
    #[must_use]
    pub fn new(start: u64) -> (Self, FaultReceiver) {
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let this = Self {
            state: Mutex::new(State { current: start, closed: None }),
            notify: Notify::new(),
            fault_tx,
        };
        (this, fault_rx)
    }

    /// Runs `f` once the internal sequence reaches `i`, then advances the sequence by
    /// `incr` (default `1` via [`Self::put`]).
    ///
    /// # Errors
    /// Returns [`OrderedSyncError::Closed`] if the synchronizer is closed either before
    /// or while waiting. Returns [`OrderedSyncError::CallbackFailed`] if `f` itself
    /// returns `Err` - the sequence still advances in that case (see type docs), and the
    /// same failure is additionally forwarded to the coordinating task's
    /// [`FaultReceiver`].
    pub async fn put_with_incr<F, Fut, T, E>(
        &self,
        i: u64,
        incr: u64,
        f: F,
    ) -> Result<T, OrderedSyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        assert!(incr >= 1, "OrderedSynchronizer::put incr must be >= 1");
        loop {
            // Register interest in the next wake *before* dropping the lock below - if we
            // instead awaited an unregistered `notified()` after the guard is released, a
            // `notify_waiters()` landing in that window would be missed entirely (`Notify`
            // stores no permit for `notify_waiters`), parking this task forever.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.state.lock().await;
                if let Some(err) = &guard.closed {
                    return Err((**err).clone());
                }
                if guard.current == i {
                    trace!(sequence = i, "running callback under ordered-sync lock");
                    let outcome = f().await;
                    guard.current = guard.current.saturating_add(incr);
                    self.notify.notify_waiters();
                    return match outcome {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            let message = e.to_string();
                            warn!(sequence = i, %message, "ordered-sync callback failed");
                            let _ = self.fault_tx.send(CallbackFault { sequence: i, message: message.clone() });
                            Err(OrderedSyncError::CallbackFailed { sequence: i, message })
                        }
                    };
                }
            }
            notified.await;
        }
    }

    /// Convenience wrapper around [`Self::put_with_incr`] with `incr = 1`.
    pub async fn put<F, Fut, T, E>(&self, i: u64, f: F) -> Result<T, OrderedSyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.put_with_incr(i, 1, f).await
    }

    /// Rewinds the current sequence to `i` and clears `closed`. Does not cancel any
    /// parked waiter - each re-checks its predicate against the new sequence on the
    /// broadcast this issues.
    pub async fn reset(&self, i: u64) {
        let mut guard = self.state.lock().await;
        guard.current = i;
        guard.closed = None;
        debug!(sequence = i, "ordered synchronizer reset");
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Latches the synchronizer closed with a default "closed" error and wakes every
    /// waiter, which then observes [`OrderedSyncError::Closed`].
    pub async fn close(&self) {
        self.close_with("ordered synchronizer closed".to_owned()).await;
    }

    /// Like [`Self::close`] but with a caller-supplied reason string.
    pub async fn close_with(&self, reason: String) {
        let mut guard = self.state.lock().await;
        guard.closed = Some(Arc::new(OrderedSyncError::Closed { reason }));
        drop(guard);
        self.notify.notify_waiters();
    }

    /// `true` until [`Self::close`]/[`Self::close_with`] has latched the synchronizer
    /// closed (and until a subsequent [`Self::reset`] revives it).
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.closed.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use tokio::sync::Mutex as TMutex;

    #[tokio::test]
    async fn fan_in_runs_in_sequence_order_regardless_of_call_order() {
        let (sync, _faults) = OrderedSynchronizer::new(1);
        let sync = StdArc::new(sync);
        let observed: StdArc<TMutex<Vec<u32>>> = StdArc::new(TMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in (1..=10u64).rev() {
            let sync = StdArc::clone(&sync);
            let observed = StdArc::clone(&observed);
            handles.push(tokio::spawn(async move {
                sync.put(i, || async {
                    observed.lock().await.push(i as u32);
                    Ok::<(), std::convert::Infallible>(())
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*observed.lock().await, (1..=10).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn put_on_closed_synchronizer_errors() {
        let (sync, _faults) = OrderedSynchronizer::new(1);
        sync.close().await;
        let result = sync.put(1, || async { Ok::<(), std::convert::Infallible>(()) }).await;
        assert!(matches!(result, Err(OrderedSyncError::Closed { .. })));
    }

    #[tokio::test]
    async fn reset_revives_a_closed_synchronizer() {
        let (sync, _faults) = OrderedSynchronizer::new(1);
        sync.close().await;
        sync.reset(1).await;
        assert!(sync.is_open().await);
        let result = sync.put(1, || async { Ok::<i32, std::convert::Infallible>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn failing_callback_still_advances_the_sequence_and_reports_the_fault() {
        let (sync, mut faults) = OrderedSynchronizer::new(1);

        let first = sync.put(1, || async { Err::<(), _>("boom") }).await;
        assert!(matches!(first, Err(OrderedSyncError::CallbackFailed { sequence: 1, .. })));

        // Sequence advanced past 1 even though the callback failed - downstream isn't
        // wedged.
        let second = sync.put(2, || async { Ok::<i32, std::convert::Infallible>(7) }).await;
        assert_eq!(second.unwrap(), 7);

        let fault = faults.recv().await.expect("fault forwarded to coordinating task");
        assert_eq!(fault.sequence, 1);
        assert_eq!(fault.message, "boom");
    }

    #[tokio::test]
    async fn incr_skips_intermediate_sequence_numbers() {
        let (sync, _faults) = OrderedSynchronizer::new(1);
        let result = sync
            .put_with_incr(1, 3, || async { Ok::<&str, std::convert::Infallible>("first") })
            .await
            .unwrap();
        assert_eq!(result, "first");

        // Sequence 2 never becomes runnable; only 1, 4, 7, ... do.
        let result = sync
            .put_with_incr(4, 3, || async { Ok::<&str, std::convert::Infallible>("second") })
            .await
            .unwrap();
        assert_eq!(result, "second");
    }
}
