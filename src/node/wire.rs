//! Control-plane wire protocol: one WebSocket connection per call (spec §6
//! Register/Heartbeat/PollCommands/PostResult/Unregister).
//!
//! Each call opens its own connection rather than multiplexing over a
//! long-lived session, since each of the five operations is independently
//! retryable.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};
use crate::types::message::{Command, CommandResult, HeartbeatMessage, RegisterResponse};
use crate::types::node::NodeInfo;

/// A single control-plane request a client node sends to a master node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlRequest {
    Register { info: NodeInfo },
    Heartbeat { message: HeartbeatMessage },
    PollCommands { node_id: String },
    PostResult { result: CommandResult },
    Unregister { node_id: String },
}

/// The matching response for each `ControlRequest` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    Registered(RegisterResponse),
    HeartbeatAck { ok: bool },
    Commands { commands: Vec<Command> },
    ResultAck { ok: bool },
    Unregistered { ok: bool },
    Error { message: String },
}

/// Opens a connection to `url`, sends one request, reads one response, and
/// closes. Wrapped in an overall `timeout` so a hung master never blocks a
/// subsystem loop forever.
pub async fn call(url: &str, request: &ControlRequest, timeout: Duration) -> Result<ControlResponse> {
    tokio::time::timeout(timeout, call_inner(url, request))
        .await
        .map_err(|_| Error::connection_timeout(url, timeout.as_secs()))?
}

async fn call_inner(url: &str, request: &ControlRequest) -> Result<ControlResponse> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::connection_failed(url, e.to_string()))?;

    let body = serde_json::to_string(request)
        .map_err(|e| Error::Internal(format!("failed to encode control request: {e}")))?;
    stream
        .send(WsMessage::Text(body))
        .await
        .map_err(|e| Error::connection_failed(url, e.to_string()))?;

    while let Some(msg) = stream.next().await {
        match msg.map_err(|e| Error::connection_failed(url, e.to_string()))? {
            WsMessage::Text(text) => {
                let response: ControlResponse = serde_json::from_str(&text)
                    .map_err(|e| Error::ProtocolMalformed { message: e.to_string() })?;
                let _ = stream.close(None).await;
                return Ok(response);
            }
            WsMessage::Close(_) => break,
            _ => continue,
        }
    }

    Err(Error::ConnectionLost { message: format!("{url} closed before responding") })
}
