//! Control-plane message types (spec §3, §6).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::node::{Capabilities, NodeRole, NodeStatus, Resources};

/// Commands a coordinator can queue for a node (spec §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    LoadModel,
    UnloadModel,
    RunLlamacpp,
    StopProcess,
    ScanModels,
    CollectLogs,
    TestLlamacpp,
    GetConfig,
}

/// A unit of work queued from one node to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub payload: Value,
    pub from_node_id: String,
    pub to_node_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

impl Command {
    pub fn new(command_type: CommandType, payload: Value, from_node_id: impl Into<String>, to_node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command_type,
            payload,
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            created_at: Utc::now(),
            priority: 0,
            retry_count: 0,
            max_retries: default_max_retries(),
            signature: None,
        }
    }
}

/// Outcome of executing a `Command`, always produced (spec §7 propagation policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl CommandResult {
    pub fn success(command_id: impl Into<String>, from_node_id: impl Into<String>, to_node_id: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            command_id: command_id.into(),
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            success: true,
            result: Some(result),
            error: None,
            metadata: HashMap::new(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(command_id: impl Into<String>, from_node_id: impl Into<String>, to_node_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            command_id: command_id.into(),
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }
}

/// Periodic liveness and resource snapshot sent by a client/hybrid node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: NodeStatus,
    pub role: NodeRole,
    pub resources: Resources,
    pub capabilities: Capabilities,
    pub sequence: i64,
}

/// Severity of a `NodeEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEventSeverity {
    Info,
    Warning,
    Error,
}

/// Event broadcast on the registry's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub severity: NodeEventSeverity,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl NodeEvent {
    pub fn new(node_id: impl Into<String>, event_type: impl Into<String>, severity: NodeEventSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            event_type: event_type.into(),
            severity,
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Node <-> master control-plane envelopes (spec §6)
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub accepted: bool,
    pub assigned_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_serde() {
        let c = Command::new(CommandType::LoadModel, serde_json::json!({"modelId": "m1"}), "master", "client-1");
        let s = serde_json::to_string(&c).unwrap();
        assert!(s.contains("\"load_model\""));
        let round: Command = serde_json::from_str(&s).unwrap();
        assert_eq!(round.command_type, CommandType::LoadModel);
    }

    #[test]
    fn test_command_result_success_failure() {
        let ok = CommandResult::success("c1", "w1", "m1", serde_json::json!({"ok": true}), 10);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = CommandResult::failure("c1", "w1", "m1", "boom", 5);
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
