//! Heartbeat subsystem: periodic liveness/resource reports with a strictly
//! increasing sequence number (spec §4.4.2).
//!
//! A missed heartbeat is logged and does not break the cycle; only
//! `max_consecutive_failures` in a row trips `HeartbeatOutcome::ReregisterNeeded`,
//! matching the registry's own `record_heartbeat_failure` counter on the
//! master side.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::node::wire::{call, ControlRequest, ControlResponse};
use crate::types::message::HeartbeatMessage;
use crate::types::node::{Capabilities, NodeRole, NodeStatus, Resources};

/// Result of a single heartbeat send.
pub enum HeartbeatOutcome {
    Ok,
    Failed,
    ReregisterNeeded,
}

/// Owns the monotonic sequence counter for one node's heartbeat stream.
pub struct HeartbeatSubsystem {
    sequence: AtomicI64,
    consecutive_failures: AtomicI64,
    max_consecutive_failures: u32,
}

impl HeartbeatSubsystem {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self { sequence: AtomicI64::new(0), consecutive_failures: AtomicI64::new(0), max_consecutive_failures }
    }

    /// Sends one heartbeat and folds the outcome into the failure streak.
    pub async fn send(
        &self,
        master_url: &str,
        node_id: &str,
        role: NodeRole,
        status: NodeStatus,
        resources: Resources,
        capabilities: Capabilities,
        call_timeout: Duration,
    ) -> HeartbeatOutcome {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = HeartbeatMessage {
            node_id: node_id.to_string(),
            timestamp: chrono::Utc::now(),
            status,
            role,
            resources,
            capabilities,
            sequence,
        };

        match self.try_send(master_url, message, call_timeout).await {
            Ok(true) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                debug!(node_id, sequence, "heartbeat acknowledged");
                HeartbeatOutcome::Ok
            }
            Ok(false) | Err(_) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(node_id, sequence, failures, "heartbeat not acknowledged");
                if failures as u32 >= self.max_consecutive_failures {
                    HeartbeatOutcome::ReregisterNeeded
                } else {
                    HeartbeatOutcome::Failed
                }
            }
        }
    }

    async fn try_send(&self, master_url: &str, message: HeartbeatMessage, call_timeout: Duration) -> Result<bool> {
        let request = ControlRequest::Heartbeat { message };
        match call(master_url, &request, call_timeout).await? {
            ControlResponse::HeartbeatAck { ok } => Ok(ok),
            _ => Ok(false),
        }
    }
}
