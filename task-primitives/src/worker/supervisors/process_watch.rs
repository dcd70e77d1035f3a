// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Joins the child process, then drives the worker into `terminating`.

use std::sync::Arc;
use tokio::process::Child;
use tracing::{info, warn};

use crate::worker::shared::{Shared, TerminateCause};

pub async fn run(mut child: Child, shared: Arc<Shared>) {
    match child.wait().await {
        Ok(status) => info!(pid = shared.child_pid, ?status, "worker child exited"),
        Err(e) => warn!(pid = shared.child_pid, error = %e, "failed to wait on worker child"),
    }
    shared.terminate(TerminateCause::ChildExited).await;
}
