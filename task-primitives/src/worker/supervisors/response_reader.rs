// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Deserializes [`Response`]s from the pipe and fulfills the matching result slot.

use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::unix::OwnedReadHalf,
};
use tracing::warn;

use crate::worker::{
    error::WorkerError,
    protocol::Response,
    shared::{Shared, TerminateCause},
};

pub async fn run(reader: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                shared.terminate(TerminateCause::PipeClosed).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "response-reader: pipe read failed, terminating worker");
                shared.terminate(TerminateCause::PipeError).await;
                return;
            }
        };

        let response: Response = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "response-reader: malformed record, terminating worker");
                shared.terminate(TerminateCause::Protocol).await;
                return;
            }
        };

        let slot = shared.futures.lock().unwrap().remove(&response.id);
        match slot {
            Some(slot) => {
                let result = match (response.value, response.error) {
                    (_, Some(message)) => Err(WorkerError::Remote(message)),
                    (Some(value), None) => Ok(value),
                    (None, None) => Err(WorkerError::Protocol("response carried neither a value nor an error".to_owned())),
                };
                let _ = slot.send(result);
            }
            None => {
                warn!(id = response.id, "response-reader: unknown or duplicate response id, terminating worker");
                shared.terminate(TerminateCause::Protocol).await;
                return;
            }
        }
    }
}
