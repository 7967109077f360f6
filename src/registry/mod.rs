//! Worker registry: the master-side source of truth for node state, queued
//! commands, and their results (spec §4.4.4).
//!
//! A coordinator-authoritative table rather than a symmetric peer mesh: one
//! side holds the canonical node states, queued commands, and pending
//! results, and every other subsystem reads and mutates through it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::message::{Command, CommandResult, HeartbeatMessage, NodeEvent, NodeEventSeverity};
use crate::types::node::{NodeInfo, NodeStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct NodeEntry {
    info: NodeInfo,
    last_sequence: i64,
    consecutive_heartbeat_failures: u32,
    pending_commands: VecDeque<Command>,
    results: HashMap<String, CommandResult>,
}

/// Tracks every node known to a master/hybrid node, their heartbeat
/// sequence, and their per-node FIFO command queue.
pub struct Registry {
    nodes: RwLock<HashMap<String, NodeEntry>>,
    events: broadcast::Sender<NodeEvent>,
    max_queue_size: Option<usize>,
    heartbeat_timeout: chrono::Duration,
    hints: RwLock<Vec<(std::net::Ipv4Addr, u16)>>,
}

impl Registry {
    pub fn new(max_queue_size: Option<usize>, heartbeat_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let heartbeat_timeout = chrono::Duration::from_std(heartbeat_timeout).unwrap_or(chrono::Duration::seconds(30));
        Self { nodes: RwLock::new(HashMap::new()), events, max_queue_size, heartbeat_timeout, hints: RwLock::new(Vec::new()) }
    }

    /// Offers a discovered host:port as a registration candidate (spec §4.6).
    /// This never registers the node itself; it still must complete an
    /// explicit registration through the normal flow.
    pub async fn offer_hint(&self, address: std::net::Ipv4Addr, port: u16) {
        let mut hints = self.hints.write().await;
        if !hints.contains(&(address, port)) {
            hints.push((address, port));
        }
    }

    pub async fn hints(&self) -> Vec<(std::net::Ipv4Addr, u16)> {
        self.hints.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Register(info) -> accepted. Replaces any prior entry for the same id.
    pub async fn register(&self, info: NodeInfo) -> Result<()> {
        let node_id = info.id.clone();
        let mut nodes = self.nodes.write().await;
        nodes.insert(
            node_id.clone(),
            NodeEntry {
                info,
                last_sequence: 0,
                consecutive_heartbeat_failures: 0,
                pending_commands: VecDeque::new(),
                results: HashMap::new(),
            },
        );
        drop(nodes);
        self.emit(&node_id, "registered", NodeEventSeverity::Info, "node registered");
        Ok(())
    }

    pub async fn unregister(&self, node_id: &str) -> Result<()> {
        let removed = self.nodes.write().await.remove(node_id);
        if removed.is_none() {
            return Err(Error::node_not_found(node_id));
        }
        self.emit(node_id, "unregistered", NodeEventSeverity::Info, "node unregistered");
        Ok(())
    }

    /// HandleHeartbeat: rejects a non-strictly-increasing sequence, otherwise
    /// updates liveness state and resets the consecutive-failure counter.
    pub async fn handle_heartbeat(&self, hb: HeartbeatMessage) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(&hb.node_id).ok_or_else(|| Error::node_not_found(&hb.node_id))?;

        if hb.sequence <= entry.last_sequence {
            return Err(Error::HeartbeatRejected { node_id: hb.node_id.clone(), sequence: hb.sequence });
        }

        entry.last_sequence = hb.sequence;
        entry.consecutive_heartbeat_failures = 0;
        entry.info.status = hb.status;
        entry.info.resources = hb.resources;
        entry.info.capabilities = hb.capabilities;
        entry.info.last_seen = Utc::now();
        entry.info.updated_at = Utc::now();
        Ok(())
    }

    /// Records a missed heartbeat; returns the new consecutive-failure count
    /// so the caller can decide whether to force re-registration.
    pub async fn record_heartbeat_failure(&self, node_id: &str) -> Result<u32> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(node_id).ok_or_else(|| Error::node_not_found(node_id))?;
        entry.consecutive_heartbeat_failures += 1;
        Ok(entry.consecutive_heartbeat_failures)
    }

    /// Scans for nodes whose `last_seen` exceeds the heartbeat timeout and
    /// marks them offline, emitting a `timeout` event per transition.
    pub async fn check_timeouts(&self) -> Vec<String> {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        let mut nodes = self.nodes.write().await;
        for (id, entry) in nodes.iter_mut() {
            if entry.info.status != NodeStatus::Offline
                && entry.info.is_stale(self.heartbeat_timeout, now)
            {
                entry.info.status = NodeStatus::Offline;
                timed_out.push(id.clone());
            }
        }
        drop(nodes);
        for id in &timed_out {
            self.emit(id, "timeout", NodeEventSeverity::Warning, "node heartbeat timed out");
        }
        timed_out
    }

    /// QueueCommand: FIFO append, enforcing `max_queue_size` if configured.
    pub async fn queue_command(&self, command: Command) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .get_mut(&command.to_node_id)
            .ok_or_else(|| Error::node_not_found(&command.to_node_id))?;
        if let Some(max) = self.max_queue_size {
            if entry.pending_commands.len() >= max {
                return Err(Error::QueueFull { node_id: command.to_node_id.clone(), max_size: max });
            }
        }
        entry.pending_commands.push_back(command);
        Ok(())
    }

    /// GetPendingCommands: drains the FIFO queue for a node's poll cycle.
    pub async fn get_pending_commands(&self, node_id: &str) -> Result<Vec<Command>> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes.get_mut(node_id).ok_or_else(|| Error::node_not_found(node_id))?;
        Ok(entry.pending_commands.drain(..).collect())
    }

    pub async fn store_command_result(&self, result: CommandResult) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let entry = nodes
            .get_mut(&result.from_node_id)
            .ok_or_else(|| Error::node_not_found(&result.from_node_id))?;
        entry.results.insert(result.command_id.clone(), result);
        Ok(())
    }

    pub async fn get_command_result(&self, node_id: &str, command_id: &str) -> Option<CommandResult> {
        self.nodes.read().await.get(node_id)?.results.get(command_id).cloned()
    }

    /// Deep-copy read of a single node.
    pub async fn get(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.read().await.get(node_id).map(|e| e.info.clone())
    }

    /// Deep-copy read of every registered node.
    pub async fn list(&self) -> Vec<NodeInfo> {
        self.nodes.read().await.values().map(|e| e.info.clone()).collect()
    }

    pub async fn list_online(&self) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|e| e.info.status != NodeStatus::Offline)
            .map(|e| e.info.clone())
            .collect()
    }

    fn emit(&self, node_id: &str, event_type: &str, severity: NodeEventSeverity, message: &str) {
        let event = NodeEvent::new(node_id, event_type, severity, message);
        // Best-effort: a lagging or absent subscriber never blocks the registry.
        if self.events.send(event).is_err() {
            warn!(node_id, "no subscribers for node event");
        } else {
            info!(node_id, event_type, "{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node::{Capabilities, NodeRole, Resources};

    fn node(id: &str) -> NodeInfo {
        let now = Utc::now();
        NodeInfo {
            id: id.to_string(),
            name: id.to_string(),
            address: "127.0.0.1".into(),
            port: 9000,
            role: NodeRole::Client,
            status: NodeStatus::Online,
            version: "0.1.0".into(),
            tags: vec![],
            metadata: HashMap::new(),
            capabilities: Capabilities::default(),
            resources: Resources::default(),
            created_at: now,
            updated_at: now,
            last_seen: now,
        }
    }

    fn heartbeat(node_id: &str, sequence: i64) -> HeartbeatMessage {
        HeartbeatMessage {
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            status: NodeStatus::Online,
            role: NodeRole::Client,
            resources: Resources::default(),
            capabilities: Capabilities::default(),
            sequence,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_requires_strictly_increasing_sequence() {
        let registry = Registry::new(None, Duration::from_secs(30));
        registry.register(node("n1")).await.unwrap();

        registry.handle_heartbeat(heartbeat("n1", 1)).await.unwrap();
        registry.handle_heartbeat(heartbeat("n1", 2)).await.unwrap();
        let err = registry.handle_heartbeat(heartbeat("n1", 2)).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::HeartbeatRejected);
        registry.handle_heartbeat(heartbeat("n1", 4)).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_command_fifo_and_max_size() {
        let registry = Registry::new(Some(1), Duration::from_secs(30));
        registry.register(node("n1")).await.unwrap();

        let c1 = Command::new(crate::types::message::CommandType::ScanModels, serde_json::json!({}), "master", "n1");
        registry.queue_command(c1.clone()).await.unwrap();

        let c2 = Command::new(crate::types::message::CommandType::ScanModels, serde_json::json!({}), "master", "n1");
        let err = registry.queue_command(c2).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::QueueFull);

        let pending = registry.get_pending_commands("n1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c1.id);
        assert!(registry.get_pending_commands("n1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_timeouts_marks_offline() {
        let registry = Registry::new(None, Duration::from_millis(1));
        registry.register(node("n1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let timed_out = registry.check_timeouts().await;
        assert_eq!(timed_out, vec!["n1".to_string()]);
        assert_eq!(registry.get("n1").await.unwrap().status, NodeStatus::Offline);
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_then_recovery() {
        let registry = Registry::new(None, Duration::from_millis(1));
        registry.register(node("n1")).await.unwrap();

        registry.handle_heartbeat(heartbeat("n1", 1)).await.unwrap();
        registry.handle_heartbeat(heartbeat("n1", 2)).await.unwrap();
        assert!(registry.handle_heartbeat(heartbeat("n1", 2)).await.is_err());
        registry.handle_heartbeat(heartbeat("n1", 4)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let timed_out = registry.check_timeouts().await;
        assert_eq!(timed_out, vec!["n1".to_string()]);
        assert_eq!(registry.get("n1").await.unwrap().status, NodeStatus::Offline);

        registry.handle_heartbeat(heartbeat("n1", 5)).await.unwrap();
        assert_eq!(registry.get("n1").await.unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn test_offer_hint_deduplicates() {
        let registry = Registry::new(None, Duration::from_secs(30));
        let addr = std::net::Ipv4Addr::new(192, 168, 1, 5);
        registry.offer_hint(addr, 8081).await;
        registry.offer_hint(addr, 8081).await;
        assert_eq!(registry.hints().await, vec![(addr, 8081)]);
    }
}
