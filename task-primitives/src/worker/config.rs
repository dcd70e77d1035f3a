// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Additive configuration for [`super::Worker::spawn`], in the same "start from
//! [`Default`], layer on named options" style used for this crate's other
//! constructor-heavy types.

use std::{ffi::OsString, path::PathBuf, sync::Arc, time::Duration};

/// One configuration override. Apply with `+`/`+=` onto a [`WorkerConfig`] - last write
/// for a given field wins.
#[derive(Clone)]
pub enum WorkerConfigOption {
    /// How long [`super::Worker::spawn`] waits for the child to connect back. Default
    /// 60 seconds.
    ConnectTimeout(Duration),
    /// Path to the worker-child executable. Defaults to a binary named
    /// `task-primitives-worker-child` next to the current executable.
    ChildExe(PathBuf),
    /// Overrides the module-search environment variable propagated to the child.
    ModulePath(OsString),
    /// Overrides the project/depot-path environment variable propagated to the child.
    ProjectPath(OsString),
    /// Receives each line of the child's merged stdout/stderr. Default: logs it via
    /// `tracing` with a `Worker <pid>:` prefix.
    OutputSink(Arc<dyn Fn(u32, &str) + Send + Sync>),
}

/// Resolved worker configuration. Build with `WorkerConfig::default() + option + option`.
#[derive(Clone)]
pub struct WorkerConfig {
    pub connect_timeout: Duration,
    pub child_exe: Option<PathBuf>,
    pub module_path: Option<OsString>,
    pub project_path: Option<OsString>,
    pub output_sink: Arc<dyn Fn(u32, &str) + Send + Sync>,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("child_exe", &self.child_exe)
            .field("module_path", &self.module_path)
            .field("project_path", &self.project_path)
            .field("output_sink", &"<fn>")
            .finish()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            child_exe: None,
            module_path: None,
            project_path: None,
            output_sink: Arc::new(|pid, line| {
                tracing::info!(worker_pid = pid, "  Worker {}:  {}", pid, line);
            }),
        }
    }
}

impl std::ops::AddAssign<WorkerConfigOption> for WorkerConfig {
    fn add_assign(&mut self, option: WorkerConfigOption) {
        match option {
            WorkerConfigOption::ConnectTimeout(d) => self.connect_timeout = d,
            WorkerConfigOption::ChildExe(p) => self.child_exe = Some(p),
            WorkerConfigOption::ModulePath(p) => self.module_path = Some(p),
            WorkerConfigOption::ProjectPath(p) => self.project_path = Some(p),
            WorkerConfigOption::OutputSink(sink) => self.output_sink = sink,
        }
    }
}

impl std::ops::Add<WorkerConfigOption> for WorkerConfig {
    type Output = Self;
    fn add(mut self, option: WorkerConfigOption) -> Self {
        self += option;
        self
    }
}
