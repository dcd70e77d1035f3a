// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Races an arbitrary future against a timer. See [`try_with_timeout`].

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Errors raised by [`try_with_timeout`].
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// `f` did not complete within the given duration. `f`'s task was aborted.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// `f`'s spawned task panicked before completing (and before the timer fired).
    #[error("task failed before completing: {0}")]
    TaskFailed(String),
}

/// Cooperative timeout signal passed into the closure given to [`try_with_timeout`].
/// Its boolean view (via [`Self::is_timed_out`]) becomes `true` once the timer has
/// fired - useful for a long-running `f` to notice cancellation at its own suspension
/// points, ahead of (or in addition to) the hard task abort that follows.
#[derive(Debug, Clone)]
pub struct TimedOutHandle {
    flag: Arc<AtomicBool>,
}

impl TimedOutHandle {
    #[must_use]
    pub fn is_timed_out(&self) -> bool { self.flag.load(Ordering::SeqCst) }
}

/// Runs `f(handle)` on a spawned task, racing it against a `duration` timer.
///
/// If `f` finishes first, its result is returned. If the timer fires first, the handle
/// it was given flips to timed-out, the task is aborted, and `f` never observes partial
/// completion beyond whatever point it had already reached - no task is left running
/// after this function returns.
///
/// # Errors
/// Returns [`TimeoutError::TimedOut`] if the timer wins the race, or
/// [`TimeoutError::TaskFailed`] if `f`'s task panics before either the result or the
/// timer arrives.
pub async fn try_with_timeout<F, Fut, T>(f: F, duration: Duration) -> Result<T, TimeoutError>
where
    F: FnOnce(TimedOutHandle) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let flag = Arc::new(AtomicBool::new(false));
    let handle = TimedOutHandle { flag: Arc::clone(&flag) };
    let mut join = tokio::spawn(f(handle));

    tokio::select! {
        result = &mut join => {
            result.map_err(|e| TimeoutError::TaskFailed(e.to_string()))
        }
        () = sleep(duration) => {
            warn!(?duration, "try_with_timeout: timer fired, aborting task");
            flag.store(true, Ordering::SeqCst);
            join.abort();
            let _ = join.await;
            Err(TimeoutError::TimedOut(duration))
        }
    }
}
