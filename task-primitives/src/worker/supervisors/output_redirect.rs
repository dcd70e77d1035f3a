// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Forwards the child's stdout and stderr, line by line, to a caller-supplied sink.

use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, ChildStdout},
};

pub async fn run(
    stdout: ChildStdout,
    stderr: ChildStderr,
    pid: u32,
    sink: Arc<dyn Fn(u32, &str) + Send + Sync>,
) {
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => {
                match line {
                    Ok(Some(l)) => sink(pid, &l),
                    _ => out_done = true,
                }
            }
            line = err_lines.next_line(), if !err_done => {
                match line {
                    Ok(Some(l)) => sink(pid, &l),
                    _ => err_done = true,
                }
            }
        }
    }
}
