// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Errors raised by [`super::Worker`].

use thiserror::Error;

use crate::timeout::TimeoutError;

#[derive(Debug, Error, Clone)]
pub enum WorkerError {
    /// The child did not connect back within the configured connect timeout.
    #[error("worker child did not connect in time: {0}")]
    ConnectTimeout(TimeoutErrorString),

    /// Spawning the child process, or an I/O operation on its pipe, failed.
    #[error("worker I/O error: {0}")]
    Io(String),

    /// The worker has transitioned to `terminating`/`terminated` - via [`super::Worker::terminate`],
    /// a pipe error, or the child exiting - and this call (or an in-flight future) was
    /// cancelled as part of that transition.
    #[error("worker terminated")]
    Terminated,

    /// The child-side evaluation raised an error; `message` carries its description
    /// (and any backtrace the child captured).
    #[error("remote evaluation failed: {0}")]
    Remote(String),

    /// A protocol violation (duplicate or unknown response id, malformed record) was
    /// observed; always terminal for the worker.
    #[error("worker protocol violation: {0}")]
    Protocol(String),

    /// A call was made after [`super::Worker::close`] had already been requested.
    #[error("worker is closed")]
    Closed,
}

/// Wraps [`TimeoutError`]'s `Display` output so [`WorkerError`] can stay `Clone` (several
/// supervisory tasks need to clone a terminal error into every pending future's slot).
#[derive(Debug, Clone)]
pub struct TimeoutErrorString(pub String);

impl std::fmt::Display for TimeoutErrorString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

impl From<TimeoutError> for TimeoutErrorString {
    fn from(e: TimeoutError) -> Self { Self(e.to_string()) }
}

impl From<TimeoutError> for WorkerError {
    fn from(e: TimeoutError) -> Self { WorkerError::ConnectTimeout(TimeoutErrorString::from(e)) }
}

impl From<std::io::Error> for WorkerError {
    fn from(e: std::io::Error) -> Self { WorkerError::Io(e.to_string()) }
}
