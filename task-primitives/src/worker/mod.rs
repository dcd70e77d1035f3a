// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Out-of-process RPC: evaluate expressions on a child process over a pipe. See
//! [`Worker`].
//!
//! The "named pipe" in the external contract is a Unix domain socket
//! ([`tokio::net::UnixListener`]/[`tokio::net::UnixStream`]) - this module is Unix-only.
//! The wire format is newline-delimited JSON: one [`protocol::Request`] or
//! [`protocol::Response`] object per line, which is self-delimiting and symmetric
//! across both ends of the pipe without any extra framing.

pub mod config;
pub mod error;
pub mod expr;
pub mod protocol;
mod shared;
mod supervisors;

use std::{
    collections::HashMap,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex as StdMutex, atomic::AtomicBool},
};

use rand::Rng;
use tokio::{
    net::UnixListener,
    process::Command,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

pub use config::{WorkerConfig, WorkerConfigOption};
pub use error::WorkerError;

use protocol::Request;
use shared::{Shared, Submission, TerminateCause};

/// A scheduled evaluation, returned by [`Worker::remote_eval`]. Call [`Self::fetch`] to
/// await its result - this split mirrors the external contract's distinction between
/// *scheduling* an evaluation and *fetching* its result.
pub struct RemoteEvalHandle {
    rx: oneshot::Receiver<Result<serde_json::Value, WorkerError>>,
}

impl RemoteEvalHandle {
    /// Awaits the evaluation's result.
    ///
    /// # Errors
    /// Propagates whatever [`WorkerError`] the worker settled this evaluation with -
    /// most commonly [`WorkerError::Remote`] (the child raised) or
    /// [`WorkerError::Terminated`] (the worker tore down before a response arrived).
    pub async fn fetch(self) -> Result<serde_json::Value, WorkerError> {
        self.rx.await.unwrap_or(Err(WorkerError::Terminated))
    }
}

/// Spawns and supervises a child evaluator process over a Unix domain socket.
///
/// Four tasks run for the lifetime of a worker: *process-watch* (joins the child),
/// *output-redirect* (forwards its stdout/stderr), *response-reader* (deserializes
/// responses and fulfills result slots) and *request-sender* (serializes requests). All
/// four converge on the same [`shared::Shared::terminate`] cleanup, whichever of them
/// notices the worker is done first - a clean [`Self::close`], a user
/// [`Self::terminate`], a pipe error, or the child exiting.
pub struct Worker {
    submit_tx: mpsc::UnboundedSender<Submission>,
    shared: Arc<Shared>,
    supervisors: StdMutex<Option<[JoinHandle<()>; 4]>>,
}

impl Worker {
    /// Launches the child evaluator and waits for it to connect back.
    ///
    /// # Errors
    /// Returns [`WorkerError::Io`] if spawning the child or binding the socket fails,
    /// or [`WorkerError::ConnectTimeout`] if the child does not connect within
    /// `config.connect_timeout`.
    pub async fn spawn(config: WorkerConfig) -> Result<Self, WorkerError> {
        let socket_path = unique_socket_path();
        let listener = UnixListener::bind(&socket_path)?;

        let child_exe = config.child_exe.clone().unwrap_or_else(default_child_exe_path);
        let mut command = Command::new(&child_exe);
        command
            .arg(&socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(module_path) = &config.module_path {
            command.env("TASK_PRIMITIVES_MODULE_PATH", module_path);
        }
        if let Some(project_path) = &config.project_path {
            command.env("TASK_PRIMITIVES_PROJECT_PATH", project_path);
        }

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| WorkerError::Io("child exited before reporting a pid".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Io("child stdout was not piped".to_owned()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::Io("child stderr was not piped".to_owned()))?;

        debug!(pid, exe = %child_exe.display(), socket = %socket_path.display(), "worker child spawned, awaiting connection");

        let accept_result = crate::timeout::try_with_timeout(
            move |_handle| async move { listener.accept().await },
            config.connect_timeout,
        )
        .await;
        let stream = match accept_result {
            Ok(Ok((stream, _peer_addr))) => stream,
            Ok(Err(io_err)) => return Err(WorkerError::from(io_err)),
            Err(timeout_err) => return Err(WorkerError::from(timeout_err)),
        };

        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            futures: StdMutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
            child_pid: pid,
            socket_path: socket_path.clone(),
        });

        let (submit_tx, submit_rx) = mpsc::unbounded_channel();

        let h_process_watch = tokio::spawn(supervisors::process_watch::run(child, Arc::clone(&shared)));
        let h_output_redirect =
            tokio::spawn(supervisors::output_redirect::run(stdout, stderr, pid, Arc::clone(&config.output_sink)));
        let h_response_reader = tokio::spawn(supervisors::response_reader::run(read_half, Arc::clone(&shared)));
        let h_request_sender = tokio::spawn(supervisors::request_sender::run(submit_rx, Arc::clone(&shared), write_half));

        Ok(Self {
            submit_tx,
            shared,
            supervisors: StdMutex::new(Some([h_process_watch, h_output_redirect, h_response_reader, h_request_sender])),
        })
    }

    /// Schedules an evaluation and returns a handle to fetch its result. Does not block
    /// on the child.
    ///
    /// # Errors
    /// Returns [`WorkerError::Terminated`]/[`WorkerError::Closed`] if the worker has
    /// already torn down or a shutdown is in flight.
    pub fn remote_eval(&self, module: Option<String>, expr: impl Into<String>) -> Result<RemoteEvalHandle, WorkerError> {
        if self.shared.is_terminated() {
            return Err(WorkerError::Terminated);
        }
        let (tx, rx) = oneshot::channel();
        let req = Request { id: rand::rng().random(), module, expr: expr.into(), shutdown: false };
        self.submit_tx.send(Submission { req, slot: tx }).map_err(|_| WorkerError::Closed)?;
        Ok(RemoteEvalHandle { rx })
    }

    /// Equivalent to `remote_eval(module, expr)?.fetch().await`.
    ///
    /// # Errors
    /// See [`Self::remote_eval`] and [`RemoteEvalHandle::fetch`].
    pub async fn remote_fetch(&self, module: Option<String>, expr: impl Into<String>) -> Result<serde_json::Value, WorkerError> {
        self.remote_eval(module, expr)?.fetch().await
    }

    /// Sends a shutdown request and waits for all four supervisory tasks to join. The
    /// child is expected to exit on its own once it processes the shutdown request;
    /// no signal is sent unless that fails to happen (see [`Self::terminate`] for the
    /// forced path).
    pub async fn close(&self) {
        let (tx, _rx) = oneshot::channel();
        let req = Request { id: rand::rng().random(), module: None, expr: String::new(), shutdown: true };
        let _ = self.submit_tx.send(Submission { req, slot: tx });
        self.wait().await;
    }

    /// Forces the worker down immediately: every pending future fails with
    /// [`WorkerError::Terminated`], the child is killed (SIGTERM, then SIGINT, then
    /// SIGKILL, with short grace sleeps between), and the socket path is removed.
    pub async fn terminate(&self) {
        self.shared.terminate(TerminateCause::UserRequested).await;
        self.wait().await;
    }

    /// Joins every supervisory task. Safe to call more than once, or concurrently with
    /// [`Self::close`]/[`Self::terminate`] - only the first caller actually waits on the
    /// handles.
    pub async fn wait(&self) {
        let handles = self.supervisors.lock().unwrap().take();
        if let Some(handles) = handles {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// `true` once this worker has entered `terminating`/`terminated`.
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.shared.is_terminated() }
}

fn unique_socket_path() -> PathBuf {
    std::env::temp_dir().join(format!("task-primitives-worker-{}.sock", uuid::Uuid::new_v4()))
}

fn default_child_exe_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("."));
    path.pop();
    path.push(if cfg!(windows) { "task-primitives-worker-child.exe" } else { "task-primitives-worker-child" });
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> WorkerConfig {
        // Tests run against the binary built alongside the test harness - Cargo places
        // it next to the test executable's own current_exe() directory, matching
        // default_child_exe_path()'s assumption.
        WorkerConfig::default() + WorkerConfigOption::ConnectTimeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn round_trip_literal_expression() {
        let worker = Worker::spawn(test_config()).await.expect("worker spawns");
        let value = worker.remote_fetch(None, "1+2").await.expect("eval succeeds");
        assert_eq!(value, serde_json::json!(3.0));
        worker.close().await;
    }

    #[tokio::test]
    async fn remote_error_carries_the_raised_message() {
        let worker = Worker::spawn(test_config()).await.expect("worker spawns");
        let result = worker.remote_fetch(None, r#"error("oops")"#).await;
        match result {
            Err(WorkerError::Remote(message)) => assert_eq!(message, "oops"),
            other => panic!("expected WorkerError::Remote, got {other:?}"),
        }
        worker.close().await;
    }

    #[tokio::test]
    async fn child_abort_fails_pending_futures_and_marks_terminated() {
        let worker = Worker::spawn(test_config()).await.expect("worker spawns");
        let handle = worker.remote_eval(None, "abort()").expect("scheduled");
        let result = handle.fetch().await;
        assert!(matches!(result, Err(WorkerError::Terminated)));
        worker.wait().await;
        assert!(worker.is_terminated());
    }
}
