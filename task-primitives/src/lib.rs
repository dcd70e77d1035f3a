// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Concurrency primitives for a cooperatively scheduled runtime (tasks multiplexed over
//! OS threads via `tokio`, with suspension only at explicit points: channel send/recv,
//! lock acquisition, sleep, join).
//!
//! - [`ordered_sync`] — serialize arbitrary concurrent callbacks into a monotonically
//!   increasing integer sequence.
//! - [`rw_lock`] — multi-reader/single-writer lock with writer preference.
//! - [`fifo_lock`] — strict-FIFO reentrant mutex (no barging).
//! - [`pool`] — bounded, optionally keyed object pool.
//! - [`timeout`] — race a future against a timer over a rendezvous channel.
//! - [`worker`] — out-of-process RPC: evaluate expressions on a child process over a
//!   pipe.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

pub mod common;
pub mod fifo_lock;
pub mod log;
pub mod ordered_sync;
pub mod pool;
pub mod rw_lock;
pub mod timeout;
pub mod worker;

pub use fifo_lock::{FifoLock, FifoLockError};
pub use ordered_sync::{OrderedSyncError, OrderedSynchronizer};
pub use pool::{Pool, PoolError, PoolReleaseError};
pub use rw_lock::ReadWriteLock;
pub use timeout::{TimedOutHandle, TimeoutError, try_with_timeout};
pub use worker::{Worker, WorkerConfig, WorkerConfigOption, WorkerError};
