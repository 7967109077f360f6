//! Coordinator API: the master/hybrid-role control-plane server accepting
//! Register/Heartbeat/PollCommands/PostResult/Unregister calls (spec §4.4.4).
//!
//! Built on `tokio-tungstenite`, accepting one short-lived connection per
//! call rather than owning a long-lived client session; each connection is
//! read once, dispatched by its `action` tag, answered, and closed.

use std::sync::Arc;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::node::wire::{ControlRequest, ControlResponse};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// Registration lease duration handed out in `RegisterResponse::expires_at`.
/// Enforced only informationally; liveness is governed by the heartbeat
/// timeout in `Registry`.
const REGISTRATION_LEASE_SECS: i64 = 3600;

/// Serves the control-plane API on `bind_address:bind_port` until the
/// process exits. Each accepted connection handles exactly one request.
pub async fn serve(bind_address: &str, bind_port: u16, registry: Arc<Registry>, scheduler: Arc<Scheduler>) -> crate::error::Result<()> {
    let listener = TcpListener::bind((bind_address, bind_port))
        .await
        .map_err(|e| crate::error::Error::IoWrite { path: format!("{bind_address}:{bind_port}").into(), source: e })?;
    info!(address = %bind_address, port = bind_port, "coordinator API listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let registry = registry.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry, scheduler).await {
                debug!(peer = %peer, error = %e, "coordinator API connection ended with an error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<Registry>, scheduler: Arc<Scheduler>) -> crate::error::Result<()> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| crate::error::Error::connection_failed("coordinator-api", e.to_string()))?;

    let Some(msg) = ws.next().await else { return Ok(()) };
    let text = match msg.map_err(|e| crate::error::Error::connection_failed("coordinator-api", e.to_string()))? {
        WsMessage::Text(text) => text,
        _ => return Ok(()),
    };

    let request: ControlRequest = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            let response = ControlResponse::Error { message: format!("malformed request: {e}") };
            return send(&mut ws, response).await;
        }
    };

    let response = dispatch(request, &registry, &scheduler).await;
    send(&mut ws, response).await
}

async fn dispatch(request: ControlRequest, registry: &Registry, scheduler: &Scheduler) -> ControlResponse {
    match request {
        ControlRequest::Register { info } => {
            let node_id = info.id.clone();
            match registry.register(info).await {
                Ok(()) => ControlResponse::Registered(crate::types::message::RegisterResponse {
                    accepted: true,
                    assigned_id: node_id,
                    expires_at: Utc::now() + chrono::Duration::seconds(REGISTRATION_LEASE_SECS),
                }),
                Err(e) => ControlResponse::Error { message: e.to_string() },
            }
        }
        ControlRequest::Heartbeat { message } => match registry.handle_heartbeat(message).await {
            Ok(()) => ControlResponse::HeartbeatAck { ok: true },
            Err(e) => {
                warn!(error = %e, "heartbeat rejected");
                ControlResponse::HeartbeatAck { ok: false }
            }
        },
        ControlRequest::PollCommands { node_id } => match registry.get_pending_commands(&node_id).await {
            Ok(commands) => ControlResponse::Commands { commands },
            Err(e) => ControlResponse::Error { message: e.to_string() },
        },
        ControlRequest::PostResult { result } => {
            scheduler.resolve_command_result(result.clone()).await;
            match registry.store_command_result(result).await {
                Ok(()) => ControlResponse::ResultAck { ok: true },
                Err(e) => ControlResponse::Error { message: e.to_string() },
            }
        }
        ControlRequest::Unregister { node_id } => match registry.unregister(&node_id).await {
            Ok(()) => ControlResponse::Unregistered { ok: true },
            Err(e) => ControlResponse::Error { message: e.to_string() },
        },
    }
}

async fn send<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>, response: ControlResponse) -> crate::error::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let body = serde_json::to_string(&response)
        .map_err(|e| crate::error::Error::Internal(format!("failed to encode control response: {e}")))?;
    ws.send(WsMessage::Text(body))
        .await
        .map_err(|e| crate::error::Error::connection_failed("coordinator-api", e.to_string()))?;
    let _ = ws.close(None).await;
    Ok(())
}
