// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Bounded, optionally keyed object pool. See [`Pool`].

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash,
    sync::Mutex as StdMutex,
};
use thiserror::Error;
use tracing::trace;

use crate::common::FifoWaiters;

/// Errors raised by [`Pool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// The user-supplied constructor failed. The permit taken for this attempt has
    /// already been released - construction failure never leaks capacity.
    #[error("pool object constructor failed: {0}")]
    Construct(E),
}

/// Errors raised by [`Pool::release`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolReleaseError {
    /// `release` was called with an object under a key that was never passed to
    /// [`Pool::acquire`]. The permit is still released - see module docs.
    #[error("release called with a key that was never acquired")]
    UnknownKey,
}

struct Inner<K, V> {
    in_use: u64,
    caches: HashMap<K, Vec<V>>,
    known_keys: HashSet<K>,
    waiters: FifoWaiters,
}

/// Bounded object pool with a global permit budget `limit` and, for keyed use, a
/// separate last-in-first-out cache per key sharing that one budget.
///
/// Use `Pool<(), V>` (see [`Pool::acquire_one`]/[`Pool::release_one`]) for the unkeyed
/// case - there is exactly one key, `()`, so "wrong key type" is a compile error rather
/// than a runtime check.
#[derive(Debug)]
pub struct Pool<K, V> {
    inner: StdMutex<Inner<K, V>>,
    limit: u64,
}

impl<K, V> Pool<K, V>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            inner: StdMutex::new(Inner {
                in_use: 0,
                caches: HashMap::new(),
                known_keys: HashSet::new(),
                waiters: FifoWaiters::new(),
            }),
            limit,
        }
    }

    /// Acquires an object for `key`, blocking until fewer than `limit` objects are
    /// currently checked out.
    ///
    /// Prefers a cached object for `key` (last-in-first-out), skipping - and silently
    /// discarding - any cached candidate for which `isvalid` returns `false`. Set
    /// `forcenew` to skip the cache entirely (existing cached objects for `key` are left
    /// untouched, not discarded). Falls back to `f` when no cached object is reused;
    /// `f` runs outside the pool's internal lock, and if it fails, the permit taken for
    /// this attempt is released before the error is returned.
    ///
    /// # Errors
    /// Returns [`PoolError::Construct`] if `f` fails.
    pub async fn acquire<F, Fut, E>(
        &self,
        key: K,
        forcenew: bool,
        isvalid: impl Fn(&V) -> bool,
        f: F,
    ) -> Result<V, PoolError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            let cached = {
                let mut guard = self.inner.lock().unwrap();
                if guard.in_use >= self.limit {
                    let rx = guard.waiters.push_back();
                    drop(guard);
                    trace!("pool at capacity, parking for a freed permit");
                    let _ = rx.await;
                    continue;
                }
                guard.in_use += 1;
                guard.known_keys.insert(key.clone());
                if forcenew {
                    None
                } else {
                    let cache = guard.caches.entry(key.clone()).or_default();
                    let mut found = None;
                    while let Some(candidate) = cache.pop() {
                        if isvalid(&candidate) {
                            found = Some(candidate);
                            break;
                        }
                    }
                    found
                }
            };

            if let Some(v) = cached {
                return Ok(v);
            }

            return match f().await {
                Ok(v) => Ok(v),
                Err(e) => {
                    let mut guard = self.inner.lock().unwrap();
                    guard.in_use = guard.in_use.saturating_sub(1);
                    guard.waiters.pop_front_and_wake();
                    Err(PoolError::Construct(e))
                }
            };
        }
    }

    /// Returns a permit for `key`, optionally pushing `obj` back onto that key's cache
    /// for reuse. Always frees one permit and wakes the longest-waiting [`Self::acquire`]
    /// caller, even if `key` turns out to be unrecognized.
    ///
    /// # Errors
    /// Returns [`PoolReleaseError::UnknownKey`] if `obj` is `Some` and `key` was never
    /// passed to [`Self::acquire`]. The permit is released regardless.
    pub fn release(&self, key: K, obj: Option<V>) -> Result<(), PoolReleaseError> {
        let obj_given = obj.is_some();
        let mut guard = self.inner.lock().unwrap();
        let known = guard.known_keys.contains(&key);
        if let Some(v) = obj {
            guard.caches.entry(key).or_default().push(v);
        }
        guard.in_use = guard.in_use.saturating_sub(1);
        guard.waiters.pop_front_and_wake();
        drop(guard);

        if obj_given && !known {
            return Err(PoolReleaseError::UnknownKey);
        }
        Ok(())
    }

    /// Empties every key's cache. Does not change `in_use` accounting.
    pub fn drain(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.caches.clear();
    }

    #[must_use]
    pub fn limit(&self) -> u64 { self.limit }

    #[must_use]
    pub fn in_use(&self) -> u64 { self.inner.lock().unwrap().in_use }

    #[must_use]
    pub fn in_pool(&self) -> usize {
        self.inner.lock().unwrap().caches.values().map(Vec::len).sum()
    }
}

impl<V> Pool<(), V> {
    /// Convenience for unkeyed use - equivalent to `acquire((), forcenew, isvalid, f)`.
    ///
    /// # Errors
    /// See [`Self::acquire`].
    pub async fn acquire_one<F, Fut, E>(
        &self,
        forcenew: bool,
        isvalid: impl Fn(&V) -> bool,
        f: F,
    ) -> Result<V, PoolError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.acquire((), forcenew, isvalid, f).await
    }

    /// Convenience for unkeyed use - equivalent to `release((), obj)`.
    pub fn release_one(&self, obj: Option<V>) {
        // The unit key is always "known" after the first acquire_one call, and every
        // caller of this crate reaches it only through acquire_one, so UnknownKey can't
        // actually occur here.
        let _ = self.release((), obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn acquire_then_release_returns_to_zero_in_use() {
        let pool: Pool<(), i32> = Pool::new(4);
        let v = pool.acquire_one(false, |_| true, || async { Ok::<i32, std::convert::Infallible>(1) }).await.unwrap();
        assert_eq!(pool.in_use(), 1);
        pool.release_one(Some(v));
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.in_pool(), 1);
    }

    #[tokio::test]
    async fn capacity_blocks_exactly_when_over_limit() {
        let pool: Arc<Pool<(), i32>> = Arc::new(Pool::new(3));
        let mut held = Vec::new();
        for i in 0..3 {
            held.push(pool.acquire_one(true, |_| true, move || async move { Ok::<i32, std::convert::Infallible>(i) }).await.unwrap());
        }
        assert_eq!(pool.in_use(), 3);

        let pool2 = Arc::clone(&pool);
        let fourth = tokio::spawn(async move {
            pool2.acquire_one(true, |_| true, || async { Ok::<i32, std::convert::Infallible>(99) }).await.unwrap()
        });

        sleep(Duration::from_millis(40)).await;
        assert!(!fourth.is_finished(), "4th acquire must block while limit is exhausted");

        let freed = held.pop().unwrap();
        pool.release_one(Some(freed));

        let v = fourth.await.unwrap();
        assert_eq!(v, 99);
    }

    #[tokio::test]
    async fn forcenew_leaves_the_freed_cached_object_in_the_pool() {
        let pool: Pool<(), i32> = Pool::new(3);
        let v = pool.acquire_one(false, |_| true, || async { Ok::<i32, std::convert::Infallible>(7) }).await.unwrap();
        pool.release_one(Some(v));
        assert_eq!(pool.in_pool(), 1);

        let _forced = pool.acquire_one(true, |_| true, || async { Ok::<i32, std::convert::Infallible>(8) }).await.unwrap();
        assert_eq!(pool.in_pool(), 1, "forcenew must not touch the existing cache");
    }

    #[tokio::test]
    async fn constructor_failure_does_not_change_in_use() {
        let pool: Pool<(), i32> = Pool::new(3);
        let result = pool.acquire_one(true, |_| true, || async { Err::<i32, _>("boom") }).await;
        assert!(matches!(result, Err(PoolError::Construct("boom"))));
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn drain_empties_cache_without_touching_in_use() {
        let pool: Pool<(), i32> = Pool::new(3);
        let v = pool.acquire_one(false, |_| true, || async { Ok::<i32, std::convert::Infallible>(1) }).await.unwrap();
        pool.release_one(Some(v));
        assert_eq!(pool.in_pool(), 1);
        pool.drain();
        assert_eq!(pool.in_pool(), 0);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn keyed_objects_only_return_to_acquirers_of_the_same_key() {
        let pool: Pool<&'static str, i32> = Pool::new(8);
        let a = pool.acquire("red".into(), false, |_| true, || async { Ok::<i32, std::convert::Infallible>(1) }).await.unwrap();
        pool.release("red", Some(a)).unwrap();

        let b = pool.acquire("blue", false, |_| true, || async { Ok::<i32, std::convert::Infallible>(2) }).await.unwrap();
        assert_eq!(b, 2, "a fresh key must never receive another key's cached object");
    }

    #[tokio::test]
    async fn release_with_unknown_key_still_frees_the_permit_but_errors() {
        let pool: Pool<&'static str, i32> = Pool::new(3);
        let result = pool.release("never-acquired", Some(42));
        assert_eq!(result, Err(PoolReleaseError::UnknownKey));
        assert_eq!(pool.in_use(), 0, "permit must not go negative, and must have been released");
    }
}
