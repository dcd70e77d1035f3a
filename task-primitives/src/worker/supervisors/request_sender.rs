// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Drains the submission channel, registers each request's result slot in the futures
//! map, then serializes the request onto the pipe.

use std::sync::Arc;
use tokio::{io::AsyncWriteExt, net::unix::OwnedWriteHalf, sync::mpsc};
use tracing::warn;

use crate::worker::shared::{Shared, Submission, TerminateCause};

pub async fn run(mut rx: mpsc::UnboundedReceiver<Submission>, shared: Arc<Shared>, mut writer: OwnedWriteHalf) {
    while let Some(Submission { req, slot }) = rx.recv().await {
        let shutdown = req.shutdown;

        let line = match serde_json::to_string(&req) {
            Ok(line) => line,
            Err(e) => {
                let _ = slot.send(Err(crate::worker::error::WorkerError::Protocol(format!(
                    "failed to serialize request: {e}"
                ))));
                continue;
            }
        };

        shared.futures.lock().unwrap().insert(req.id, slot);

        let write_result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = write_result {
            warn!(error = %e, "request-sender: pipe write failed, terminating worker");
            shared.terminate(TerminateCause::PipeError).await;
            break;
        }

        if shutdown {
            break;
        }
    }
}
