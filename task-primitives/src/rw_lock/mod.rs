// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Writer-preferring multi-reader/single-writer lock. See [`ReadWriteLock`].

use std::sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicI64, Ordering},
};
use tokio::sync::{Mutex as TMutex, Notify, OwnedMutexGuard};
use tracing::trace;

/// Sentinel offset encoding "a writer is active or pending" in [`ReadWriteLock`]'s
/// reader counter. Readers observe a negative counter and park; writers subtract this
/// once to claim the counter and add it back on release.
///
/// This is the same algorithm Go's `sync.RWMutex` uses, down to this constant.
const MAX_READERS: i64 = 1 << 30;

/// Multi-reader/single-writer lock with writer preference: once a writer starts
/// acquiring, new readers park until that writer has run and released, even if they
/// arrive after the writer but before it actually acquires.
///
/// # Summary
/// - `read_lock`/`read_unlock` are recursive in *count* only (not per task) - any number
///   of readers may hold concurrently.
/// - `lock`/`unlock` are exclusive with both readers and other writers.
/// - Uses atomics for the fast (uncontended) reader path and `tokio::sync::Notify` for
///   the two park points (`readwait` for readers, `writeready` for the writer).
#[derive(Debug)]
pub struct ReadWriteLock {
    writer_mutex: Arc<TMutex<()>>,
    held_writer_guard: StdMutex<Option<OwnedMutexGuard<()>>>,
    reader_count: AtomicI64,
    reader_wait: AtomicI64,
    read_notify: Notify,
    write_notify: Notify,
}

impl Default for ReadWriteLock {
    fn default() -> Self { Self::new() }
}

impl ReadWriteLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer_mutex: Arc::new(TMutex::new(())),
            held_writer_guard: StdMutex::new(None),
            reader_count: AtomicI64::new(0),
            reader_wait: AtomicI64::new(0),
            read_notify: Notify::new(),
            write_notify: Notify::new(),
        }
    }

    /// Acquires a shared (reader) lock. Parks if a writer is active or pending.
    pub async fn read_lock(&self) {
        let new_val = self.reader_count.fetch_add(1, Ordering::SeqCst) + 1;
        if new_val >= 0 {
            return;
        }
        trace!("read_lock parking - writer active or pending");
        loop {
            // Register interest before re-checking the counter - otherwise a writer's
            // `unlock()` broadcasting `read_notify.notify_waiters()` between our check and
            // the `.await` below would never reach us, since `notify_waiters()` wakes only
            // already-registered waiters and stores no permit for latecomers.
            let notified = self.read_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.reader_count.load(Ordering::SeqCst) >= 0 {
                return;
            }
            notified.await;
        }
    }

    /// Releases a shared (reader) lock. If this reader was the last one a pending
    /// writer was draining, signals that writer's `writeready` event.
    pub fn read_unlock(&self) {
        let old = self.reader_count.fetch_sub(1, Ordering::SeqCst);
        let new = old - 1;
        if new < 0 {
            let old_wait = self.reader_wait.fetch_sub(1, Ordering::SeqCst);
            if old_wait - 1 == 0 {
                self.write_notify.notify_one();
            }
        }
    }

    /// Acquires the exclusive (writer) lock. Blocks out new readers immediately (they
    /// observe a negative counter and park) and waits for any readers already active at
    /// the moment of acquisition to drain.
    pub async fn lock(&self) {
        let owned_guard = Arc::clone(&self.writer_mutex).lock_owned().await;
        {
            let mut slot = self.held_writer_guard.lock().unwrap();
            *slot = Some(owned_guard);
        }

        let r = self.reader_count.fetch_sub(MAX_READERS, Ordering::SeqCst);
        if r != 0 {
            let old_wait = self.reader_wait.fetch_add(r, Ordering::SeqCst);
            if old_wait + r != 0 {
                trace!(active_readers = r, "writer draining readers before proceeding");
                self.write_notify.notified().await;
            }
        }
    }

    /// Releases the exclusive (writer) lock, rebumping the reader counter and waking
    /// any readers that parked while the writer held the lock.
    pub fn unlock(&self) {
        let old = self.reader_count.fetch_add(MAX_READERS, Ordering::SeqCst);
        let new = old + MAX_READERS;
        if new > 0 {
            self.read_notify.notify_waiters();
        }
        let mut slot = self.held_writer_guard.lock().unwrap();
        *slot = None;
    }

    /// `true` while a writer currently holds [`Self::lock`].
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.held_writer_guard.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::time::Duration;
    use tokio::sync::Mutex as TMutex2;
    use tokio::time::sleep;

    #[tokio::test]
    async fn multiple_readers_may_overlap() {
        let lock = StdArc::new(ReadWriteLock::new());
        lock.read_lock().await;
        lock.read_lock().await;
        // Neither read_lock blocked - both returned, proving concurrent readers.
        lock.read_unlock();
        lock.read_unlock();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let lock = StdArc::new(ReadWriteLock::new());
        lock.lock().await;
        assert!(lock.is_locked());

        let lock2 = StdArc::clone(&lock);
        let reader = tokio::spawn(async move {
            lock2.read_lock().await;
            lock2.read_unlock();
        });

        sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished(), "reader must not proceed while writer holds the lock");

        lock.unlock();
        reader.await.unwrap();
    }

    /// RW fairness: a writer queued behind an active reader blocks a reader that arrives
    /// after it, until the writer releases.
    #[tokio::test]
    async fn writer_preference_blocks_late_arriving_readers() {
        let lock = StdArc::new(ReadWriteLock::new());
        let log: StdArc<TMutex2<Vec<&'static str>>> = StdArc::new(TMutex2::new(Vec::new()));

        // T1 holds a read lock.
        lock.read_lock().await;

        // T2 starts a write lock - it must wait for T1, so run it on a task.
        let lock_t2 = StdArc::clone(&lock);
        let log_t2 = StdArc::clone(&log);
        let t2 = tokio::spawn(async move {
            lock_t2.lock().await;
            log_t2.lock().await.push("writer-acquired");
            sleep(Duration::from_millis(20)).await;
            lock_t2.unlock();
        });

        // Give T2 time to register as a pending writer.
        sleep(Duration::from_millis(30)).await;

        // T3 starts a read lock after T2 is already waiting - it must not jump ahead.
        let lock_t3 = StdArc::clone(&lock);
        let log_t3 = StdArc::clone(&log);
        let t3 = tokio::spawn(async move {
            lock_t3.read_lock().await;
            log_t3.lock().await.push("reader3-acquired");
            lock_t3.read_unlock();
        });

        sleep(Duration::from_millis(30)).await;
        assert_eq!(*log.lock().await, Vec::<&str>::new(), "writer must not have run yet - T1 still holds the reader lock");

        lock.read_unlock(); // T1 releases, unblocking T2.
        t2.await.unwrap();
        t3.await.unwrap();

        let order = log.lock().await.clone();
        assert_eq!(order, vec!["writer-acquired", "reader3-acquired"]);
    }
}
