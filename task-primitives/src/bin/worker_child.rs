// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Worker child process: connects back to the socket path given as its first argument,
//! reads one [`Request`] per line, evaluates it, and writes back one [`Response`] per
//! line - until a shutdown request arrives or the socket closes.

use miette::{Context, IntoDiagnostic, miette};
use task_primitives::worker::{
    expr::{self, Outcome},
    protocol::{Request, Response},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

#[tokio::main]
async fn main() -> miette::Result<()> {
    task_primitives::log::init_tracing();

    let socket_path = std::env::args().nth(1).ok_or_else(|| miette!("missing socket path argument"))?;

    let stream = UnixStream::connect(&socket_path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to connect to {socket_path}"))?;

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("worker_child: pipe read failed: {e}");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("worker_child: malformed request, ignoring: {e}");
                continue;
            }
        };

        if request.shutdown {
            break;
        }

        let response = match expr::eval(&request.expr) {
            Outcome::Value(value) => Response { id: request.id, value: Some(value), error: None },
            Outcome::Error(e) => Response { id: request.id, value: None, error: Some(e.to_string()) },
            Outcome::Abort => {
                // No response is sent for an abort - the parent observes the process
                // exit and tears the worker down from there.
                std::process::abort();
            }
        };

        let line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("worker_child: failed to serialize response: {e}");
                continue;
            }
        };
        if write_half.write_all(line.as_bytes()).await.is_err()
            || write_half.write_all(b"\n").await.is_err()
            || write_half.flush().await.is_err()
        {
            eprintln!("worker_child: pipe write failed, exiting");
            break;
        }
    }

    Ok(())
}
