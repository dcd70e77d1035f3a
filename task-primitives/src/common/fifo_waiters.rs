// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A plain FIFO queue of one-shot wake signals.
//!
//! Neither `std::sync::Condvar` nor `tokio::sync::Notify` guarantees that exactly one
//! specific waiter (the one that arrived first) is woken by a single "wake one" call.
//! [`FIFOLock`](crate::fifo_lock::FifoLock) and [`Pool`](crate::pool::Pool) both need a
//! strict first-arrived-first-woken hand-off, so they share this tiny hand-rolled queue
//! instead. It carries no lock of its own — callers hold it behind their own
//! `std::sync::Mutex` for the handful of non-blocking instructions it takes to push/pop,
//! and never across an `.await`.

use std::collections::VecDeque;
use tokio::sync::oneshot;

/// FIFO queue of parked tasks waiting for a hand-off wake.
#[derive(Debug, Default)]
pub struct FifoWaiters {
    queue: VecDeque<oneshot::Sender<()>>,
}

impl FifoWaiters {
    pub fn new() -> Self { Self { queue: VecDeque::new() } }

    /// Enqueues a new waiter at the back and returns the receiver half it should
    /// `.await` (outside whatever lock guards this queue).
    pub fn push_back(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queue.push_back(tx);
        rx
    }

    /// Wakes the front-most waiter, if any. Returns `true` if a waiter was woken.
    ///
    /// A dropped receiver (the waiting task was cancelled) makes `send` fail silently;
    /// that slot is simply skipped and the next waiter in line is tried instead, so a
    /// cancelled waiter never swallows a hand-off meant for someone behind it.
    pub fn pop_front_and_wake(&mut self) -> bool {
        while let Some(tx) = self.queue.pop_front() {
            if tx.send(()).is_ok() {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    pub fn len(&self) -> usize { self.queue.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wakes_in_fifo_order() {
        let mut waiters = FifoWaiters::new();
        let rx1 = waiters.push_back();
        let rx2 = waiters.push_back();
        let rx3 = waiters.push_back();

        assert!(waiters.pop_front_and_wake());
        rx1.await.expect("first waiter woken");

        assert!(waiters.pop_front_and_wake());
        rx2.await.expect("second waiter woken");

        assert!(waiters.pop_front_and_wake());
        rx3.await.expect("third waiter woken");

        assert!(!waiters.pop_front_and_wake());
    }

    #[tokio::test]
    async fn skips_cancelled_waiters() {
        let mut waiters = FifoWaiters::new();
        let rx1 = waiters.push_back();
        let rx2 = waiters.push_back();
        drop(rx1);

        assert!(waiters.pop_front_and_wake());
        rx2.await.expect("second waiter woken after first was dropped");
    }

    #[test]
    fn empty_queue_reports_no_wake() {
        let mut waiters = FifoWaiters::new();
        assert!(waiters.is_empty());
        assert!(!waiters.pop_front_and_wake());
    }
}
