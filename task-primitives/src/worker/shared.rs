// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! State shared across a [`super::Worker`]'s four supervisory tasks.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{error::WorkerError, protocol::Request};

pub type ResultSlot = oneshot::Sender<Result<serde_json::Value, WorkerError>>;

/// A scheduled evaluation paired with the slot its result (or terminal error) is
/// delivered to.
pub struct Submission {
    pub req: Request,
    pub slot: ResultSlot,
}

/// Why a worker is transitioning to `terminating` - carried only for logging, since
/// every path converges on the same cleanup.
#[derive(Debug, Clone, Copy)]
pub enum TerminateCause {
    UserRequested,
    ChildExited,
    PipeClosed,
    PipeError,
    Protocol,
}

/// The only non-trivial shared mutable state across a worker's supervisory tasks: the
/// pending-request map (the *futures map*) and the atomic `terminated` latch.
pub struct Shared {
    pub futures: StdMutex<HashMap<u64, ResultSlot>>,
    pub terminated: AtomicBool,
    pub child_pid: u32,
    pub socket_path: PathBuf,
}

impl Shared {
    #[must_use]
    pub fn is_terminated(&self) -> bool { self.terminated.load(Ordering::SeqCst) }

    /// Drives this worker into `terminating`, idempotently. The first caller to win the
    /// CAS on `terminated` fails every pending future and runs the child
    /// signal-escalation/cleanup sequence; every later or concurrent caller (there can
    /// be several - user `terminate`, a pipe error, the child exiting) returns
    /// immediately once the winner has been determined.
    pub async fn terminate(self: &Arc<Self>, cause: TerminateCause) {
        if self.terminated.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        debug!(?cause, pid = self.child_pid, "worker terminating");
        self.fail_all_pending();
        self.signal_child_and_cleanup().await;
    }

    fn fail_all_pending(&self) {
        let mut futures = self.futures.lock().unwrap();
        for (_, slot) in futures.drain() {
            let _ = slot.send(Err(WorkerError::Terminated));
        }
    }

    /// Escalates SIGTERM -> SIGINT -> SIGKILL with a short grace sleep between each,
    /// stopping as soon as a signal fails (the process is already gone), then removes
    /// the listening socket path.
    async fn signal_child_and_cleanup(&self) {
        let pid = Pid::from_raw(self.child_pid as i32);
        let steps = [
            (Signal::SIGTERM, Some(Duration::from_millis(200))),
            (Signal::SIGINT, Some(Duration::from_millis(200))),
            (Signal::SIGKILL, None),
        ];
        for (sig, grace) in steps {
            if signal::kill(pid, sig).is_err() {
                break;
            }
            if let Some(grace) = grace {
                tokio::time::sleep(grace).await;
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %self.socket_path.display(), "failed to remove worker socket path");
            }
        }
    }
}
