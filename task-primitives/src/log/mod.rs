// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Structured logging setup.
//!
//! Just a `tracing_subscriber::fmt` layer gated by an `EnvFilter` - this crate is a
//! library with a small worker-child binary, not an interactive application, so there is
//! no custom writer or event formatter to plug in, only what a test harness or an
//! embedding binary needs to see readable spans and events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the environment variable consulted for the log level/filter directives.
///
/// Falls back to `info` when unset or unparsable.
pub const LOG_ENV_VAR: &str = "TASK_PRIMITIVES_LOG";

/// Installs a process-global `tracing` subscriber suitable for the worker child binary
/// and for examples/tests that want human-readable output.
///
/// Installs a global subscriber rather than a thread-local/test-scoped one, so there is
/// nothing to return - logging stays active for the remainder of the process. Safe to
/// call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
