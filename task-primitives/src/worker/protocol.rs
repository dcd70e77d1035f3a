// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Wire types exchanged between a [`super::Worker`] and its child process: one JSON
//! object per line, alternating [`Request`] and [`Response`].

use serde::{Deserialize, Serialize};

/// One evaluation request, or a shutdown notice (`shutdown: true`, in which case
/// `module`/`expr` are ignored by the child).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub expr: String,
    pub shutdown: bool,
}

/// The child's reply to exactly one [`Request`] by matching `id`. Exactly one of
/// `value`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
