//! Integration tests for the node <-> master control-plane wire protocol
//!
//! The binary crate has no library target, so these tests cannot call
//! `node::coordinator_api` directly; instead they drive the same
//! one-request-per-connection WebSocket shape it serves, built by hand
//! against the documented `ControlRequest`/`ControlResponse` tags
//! (`action`/`status`, snake_case).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

/// Mock master server: accepts one request per connection and replies with
/// a fixed ack, recording every message it receives. Mirrors
/// `node::coordinator_api::handle_connection`'s shape without depending on
/// it.
struct MockMaster {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    messages_received: Arc<RwLock<Vec<String>>>,
}

impl MockMaster {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let messages_received = Arc::new(RwLock::new(Vec::new()));
        let messages_clone = messages_received.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            let messages = messages_clone.clone();
                            tokio::spawn(async move {
                                if let Ok(ws_stream) = accept_async(stream).await {
                                    handle_connection(ws_stream, messages).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self { addr, shutdown_tx: Some(shutdown_tx), messages_received }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn messages(&self) -> Vec<String> {
        self.messages_received.read().clone()
    }
}

impl Drop for MockMaster {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Dispatches one `ControlRequest`-shaped message and closes, same as the
/// real coordinator API's one-call-per-connection contract.
async fn handle_connection<S>(mut ws_stream: S, messages: Arc<RwLock<Vec<String>>>)
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + SinkExt<WsMessage> + Unpin,
{
    let Some(Ok(WsMessage::Text(text))) = ws_stream.next().await else { return };
    messages.write().push(text.clone());

    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else { return };
    let response = match parsed.get("action").and_then(|t| t.as_str()) {
        Some("register") => serde_json::json!({
            "status": "registered",
            "accepted": true,
            "assigned_id": parsed["info"]["id"],
            "expires_at": chrono::Utc::now().to_rfc3339(),
        }),
        Some("heartbeat") => serde_json::json!({ "status": "heartbeat_ack", "ok": true }),
        Some("poll_commands") => serde_json::json!({ "status": "commands", "commands": [] }),
        Some("post_result") => serde_json::json!({ "status": "result_ack", "ok": true }),
        Some("unregister") => serde_json::json!({ "status": "unregistered", "ok": true }),
        _ => serde_json::json!({ "status": "error", "message": "unknown action" }),
    };
    let _ = ws_stream.send(WsMessage::Text(response.to_string())).await;
    let _ = ws_stream.close().await;
}

// ─────────────────────────────────────────────────────────────────
// Wire format tests — literal shape of the tagged control-plane enums
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_register_request_shape() {
    let request = serde_json::json!({
        "action": "register",
        "info": {
            "id": Uuid::new_v4().to_string(),
            "name": "test-node",
            "address": "127.0.0.1",
            "port": 8081,
            "role": "client",
            "status": "online",
            "version": "0.1.0",
            "tags": [],
            "metadata": {},
            "capabilities": {},
            "resources": {},
            "created_at": chrono::Utc::now().to_rfc3339(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
            "last_seen": chrono::Utc::now().to_rfc3339(),
        }
    });

    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"action\":\"register\""));
    assert!(json.contains("test-node"));
}

#[test]
fn test_heartbeat_request_shape() {
    let request = serde_json::json!({
        "action": "heartbeat",
        "message": {
            "node_id": "node-123",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "status": "online",
            "role": "client",
            "resources": {},
            "capabilities": {},
            "sequence": 4,
        }
    });

    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"action\":\"heartbeat\""));
    assert!(json.contains("node-123"));
    assert!(json.contains("\"sequence\":4"));
}

#[test]
fn test_poll_commands_request_shape() {
    let request = serde_json::json!({ "action": "poll_commands", "node_id": "node-123" });
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"action\":\"poll_commands\""));
}

#[test]
fn test_post_result_request_shape() {
    let request = serde_json::json!({
        "action": "post_result",
        "result": {
            "command_id": "cmd-1",
            "from_node_id": "node-123",
            "to_node_id": "scheduler",
            "success": true,
            "result": { "text": "generated output" },
            "metadata": {},
            "duration_ms": 1500,
            "completed_at": chrono::Utc::now().to_rfc3339(),
        }
    });

    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"action\":\"post_result\""));
    assert!(json.contains("generated output"));
}

// ─────────────────────────────────────────────────────────────────
// Mock master round-trip tests
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mock_master_starts() {
    let master = MockMaster::start().await;
    assert!(master.ws_url().starts_with("ws://127.0.0.1:"));
}

#[tokio::test]
async fn test_mock_master_accepts_register() {
    let master = MockMaster::start().await;
    let (ws_stream, _) = tokio_tungstenite::connect_async(&master.ws_url()).await.unwrap();
    let (mut write, mut read) = ws_stream.split();

    let register = serde_json::json!({
        "action": "register",
        "info": { "id": "node-abc", "name": "Test Node" }
    });
    write.send(WsMessage::Text(register.to_string())).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next()).await.unwrap().unwrap().unwrap();
    if let WsMessage::Text(text) = response {
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "registered");
        assert_eq!(parsed["accepted"], true);
    } else {
        panic!("expected text message");
    }

    let messages = master.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("register"));
}

#[tokio::test]
async fn test_mock_master_heartbeat_ack() {
    let master = MockMaster::start().await;
    let (ws_stream, _) = tokio_tungstenite::connect_async(&master.ws_url()).await.unwrap();
    let (mut write, mut read) = ws_stream.split();

    let heartbeat = serde_json::json!({
        "action": "heartbeat",
        "message": { "node_id": "node-abc", "sequence": 1 }
    });
    write.send(WsMessage::Text(heartbeat.to_string())).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next()).await.unwrap().unwrap().unwrap();
    if let WsMessage::Text(text) = response {
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "heartbeat_ack");
        assert_eq!(parsed["ok"], true);
    } else {
        panic!("expected text message");
    }
}

#[tokio::test]
async fn test_mock_master_unknown_action_errors() {
    let master = MockMaster::start().await;
    let (ws_stream, _) = tokio_tungstenite::connect_async(&master.ws_url()).await.unwrap();
    let (mut write, mut read) = ws_stream.split();

    write.send(WsMessage::Text(serde_json::json!({"action": "nonsense"}).to_string())).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), read.next()).await.unwrap().unwrap().unwrap();
    if let WsMessage::Text(text) = response {
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "error");
    } else {
        panic!("expected text message");
    }
}

// ─────────────────────────────────────────────────────────────────
// Error payload shape tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_error_code_format() {
    let error = serde_json::json!({
        "code": "E501",
        "message": "task timed out after 300 seconds",
        "retryable": true,
        "details": { "timeout_secs": 300, "elapsed_secs": 305 }
    });

    let json = serde_json::to_string(&error).unwrap();
    assert!(json.contains("E501"));
    assert!(json.contains("retryable"));
}
