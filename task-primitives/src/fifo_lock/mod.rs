// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Strict-FIFO reentrant mutex. See [`FifoLock`].

use std::{collections::VecDeque, sync::Mutex as StdMutex};
use thiserror::Error;
use tokio::{sync::oneshot, task::Id as TaskId};
use tracing::trace;

/// Errors raised by [`FifoLock::unlock`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FifoLockError {
    #[error("unlock called by a task that does not own the lock")]
    NotOwner,
    #[error("unlock called on a lock that is not held")]
    NotLocked,
}

struct Waiter {
    task: TaskId,
    wake: oneshot::Sender<()>,
}

struct Inner {
    owner: Option<TaskId>,
    reentrancy: u64,
    waiters: VecDeque<Waiter>,
}

impl Inner {
    /// Grants the lock to `tid` if it already owns it or if the lock is free. Returns
    /// `true` on success, leaving `owner`/`reentrancy` updated.
    fn try_acquire(&mut self, tid: TaskId) -> bool {
        if self.owner == Some(tid) {
            self.reentrancy += 1;
            return true;
        }
        if self.owner.is_none() {
            self.owner = Some(tid);
            self.reentrancy = 1;
            return true;
        }
        false
    }
}

/// Reentrant mutex with strict first-arrived-first-acquired ordering among distinct
/// tasks: no task ever barges ahead of one that arrived at the contention point before
/// it, even if that earlier task is slow to be rescheduled.
///
/// The calling task's identity is [`tokio::task::id`] - reentrant acquisition is
/// per-task, not per-acquisition-site.
#[derive(Debug)]
pub struct FifoLock {
    inner: StdMutex<Inner>,
}

impl Default for FifoLock {
    fn default() -> Self { Self::new() }
}

impl FifoLock {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: StdMutex::new(Inner { owner: None, reentrancy: 0, waiters: VecDeque::new() }) }
    }

    /// Attempts to acquire without waiting. Reentrant for the calling task. Returns
    /// `false` if another task currently holds the lock.
    pub fn try_lock(&self) -> bool {
        let tid = tokio::task::id();
        self.inner.lock().unwrap().try_acquire(tid)
    }

    /// Acquires the lock, parking behind any task that arrived at contention first.
    /// Ownership on the slow path is handed off directly by [`Self::unlock`], not
    /// re-acquired competitively - that is what makes the FIFO order exact.
    pub async fn lock(&self) {
        let tid = tokio::task::id();
        let rx = {
            let mut guard = self.inner.lock().unwrap();
            if guard.try_acquire(tid) {
                return;
            }
            let (tx, rx) = oneshot::channel();
            trace!(queue_len = guard.waiters.len() + 1, "fifo lock contended, enqueuing");
            guard.waiters.push_back(Waiter { task: tid, wake: tx });
            rx
        };
        // The sender side is only ever dropped by unlock() after assigning us as owner,
        // so a recv error here would mean a bug in the handoff, not a normal outcome.
        let _ = rx.await;
    }

    /// Releases one level of reentrancy. Once reentrancy reaches zero, hands the lock
    /// directly to the longest-waiting task, if any.
    ///
    /// # Errors
    /// Returns [`FifoLockError::NotLocked`] if no task holds the lock, or
    /// [`FifoLockError::NotOwner`] if the calling task is not the current owner.
    pub fn unlock(&self) -> Result<(), FifoLockError> {
        let tid = tokio::task::id();
        let mut guard = self.inner.lock().unwrap();
        match guard.owner {
            None => return Err(FifoLockError::NotLocked),
            Some(owner) if owner != tid => return Err(FifoLockError::NotOwner),
            Some(_) => {}
        }
        guard.reentrancy -= 1;
        if guard.reentrancy > 0 {
            return Ok(());
        }
        // A waiter whose `lock()` future was dropped/cancelled leaves a dead sender in the
        // queue - handing ownership to it would wedge every later locker behind a task that
        // will never unlock. Skip past cancelled waiters until one actually accepts the
        // handoff, or the queue runs dry.
        guard.owner = None;
        while let Some(next) = guard.waiters.pop_front() {
            if next.wake.send(()).is_ok() {
                guard.owner = Some(next.task);
                guard.reentrancy = 1;
                break;
            }
        }
        Ok(())
    }

    /// `true` while any task holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lock().unwrap().owner.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex2};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn reentrant_lock_and_unlock_never_blocks() {
        let lock = FifoLock::new();
        lock.lock().await;
        lock.lock().await;
        assert!(lock.try_lock());
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn unlock_from_non_owner_errors() {
        let lock = Arc::new(FifoLock::new());
        lock.lock().await;

        let lock2 = Arc::clone(&lock);
        let result = tokio::spawn(async move { lock2.unlock() }).await.unwrap();
        assert_eq!(result, Err(FifoLockError::NotOwner));
    }

    #[tokio::test]
    async fn unlock_when_not_held_errors() {
        let lock = FifoLock::new();
        assert_eq!(lock.unlock(), Err(FifoLockError::NotLocked));
    }

    /// 16 tasks arrive at a held lock in order; exit rank must equal arrival rank.
    #[tokio::test]
    async fn strict_fifo_among_sixteen_contending_tasks() {
        let lock = Arc::new(FifoLock::new());
        let order: Arc<StdMutex2<Vec<usize>>> = Arc::new(StdMutex2::new(Vec::new()));

        lock.lock().await; // held by the test task itself, acting as task 0's holder.

        let mut handles = Vec::new();
        for rank in 0..16usize {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                // Stagger task startup so they enqueue in `rank` order - join handles
                // don't guarantee scheduling order on their own.
                sleep(Duration::from_millis(rank as u64)).await;
                lock.lock().await;
                order.lock().unwrap().push(rank);
                lock.unlock().unwrap();
            }));
        }

        // Give every task time to enqueue before releasing the lock.
        sleep(Duration::from_millis(50)).await;
        lock.unlock().unwrap();

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<usize>>());
    }
}
