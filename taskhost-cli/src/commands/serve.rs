//! `taskhost serve`: JSON-lines transport over stdio
//!
//! Each stdin line is a request `{"id": ..., "task": "name", "payload": "text"}`
//! and produces exactly one stdout line `{"id": ..., "state": ..., "output": ...}`.
//! Requests run concurrently; replies are written in completion order.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use taskhost_config::TaskhostConfig;
use taskhost_execution::Dispatcher;
use taskhost_ipc::{LineWriter, RpcReply};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ServeRequest {
    #[serde(default)]
    id: Option<JsonValue>,
    task: String,
    payload: String,
}

#[derive(Debug, Serialize)]
struct ServeReply {
    id: JsonValue,
    #[serde(flatten)]
    reply: RpcReply,
}

impl ServeReply {
    fn error(id: JsonValue) -> Self {
        Self {
            id,
            reply: RpcReply::error(),
        }
    }
}

/// A request that parsed, or the reply for one that did not
enum Parsed {
    Request { id: JsonValue, task: String, payload: String },
    Invalid(ServeReply),
}

fn parse_request(line: &str) -> Parsed {
    match serde_json::from_str::<ServeRequest>(line) {
        Ok(request) => Parsed::Request {
            id: request
                .id
                .unwrap_or_else(|| JsonValue::String(Uuid::new_v4().to_string())),
            task: request.task,
            payload: request.payload,
        },
        Err(e) => {
            warn!("Rejecting malformed request: {}", e);
            Parsed::Invalid(ServeReply::error(JsonValue::Null))
        }
    }
}

async fn execute(dispatcher: &Dispatcher, id: JsonValue, task: &str, payload: String) -> ServeReply {
    match dispatcher.dispatch(task, payload).await {
        Ok(outcome) => {
            if let Some(e) = outcome.error() {
                info!(task, request = %id, "Invocation failed: {}", e);
            }
            ServeReply {
                id,
                reply: outcome.into_reply(),
            }
        }
        Err(e) => {
            warn!(task, request = %id, "{}", e);
            ServeReply::error(id)
        }
    }
}

pub async fn run(config: &TaskhostConfig) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::from_config(config));
    info!(
        tasks = ?dispatcher.task_names().collect::<Vec<_>>(),
        "Serving requests from stdin"
    );

    let (replies, mut outbox) = mpsc::unbounded_channel::<ServeReply>();
    let writer = tokio::spawn(async move {
        let mut stdout = LineWriter::new(tokio::io::stdout());
        while let Some(reply) = outbox.recv().await {
            let line = match serde_json::to_string(&reply) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode reply: {}", e);
                    continue;
                }
            };
            if let Err(e) = stdout.write_line(&line).await {
                warn!("Failed to write reply: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read request from stdin")?,
            _ = &mut ctrl_c => {
                info!("Interrupted, no longer accepting requests");
                break;
            }
        };
        let Some(line) = line else {
            debug!("Stdin closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_request(&line) {
            Parsed::Request { id, task, payload } => {
                let dispatcher = Arc::clone(&dispatcher);
                let replies = replies.clone();
                in_flight.spawn(async move {
                    let reply = execute(&dispatcher, id, &task, payload).await;
                    let _ = replies.send(reply);
                });
            }
            Parsed::Invalid(reply) => {
                let _ = replies.send(reply);
            }
        }
    }

    if !in_flight.is_empty() {
        info!(requests = in_flight.len(), "Waiting for in-flight requests");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!("Request task failed: {}", e);
        }
    }

    drop(replies);
    writer.await.context("Reply writer failed")?;

    if let Ok(dispatcher) = Arc::try_unwrap(dispatcher) {
        dispatcher.shutdown().await;
    }
    info!("Stopped serving");
    Ok(())
}
