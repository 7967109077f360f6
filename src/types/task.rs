//! Scheduler task and its lifecycle (spec §3, §4.5).
//!
//! Transitions are explicit mark_* calls rather than a single setter, so each
//! one can enforce its own preconditions (e.g. cancel only from non-terminal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// A unit of work the scheduler owns end-to-end on the coordinator side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: i32,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: Value, timeout_ms: u64, max_retries: u32, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            assigned_node_id: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            timeout_ms,
            priority,
        }
    }

    /// pending -> running, records the assigned node.
    pub fn mark_running(&mut self, node_id: impl Into<String>) {
        self.status = TaskStatus::Running;
        self.assigned_node_id = Some(node_id.into());
        self.started_at = Some(Utc::now());
    }

    /// running -> completed, captures the result.
    pub fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    /// running -> failed, captures the error.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Reset a failed attempt back to pending for a retry, dropping the prior assignment.
    pub fn reset_for_retry(&mut self) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.assigned_node_id = None;
        self.started_at = None;
        self.error = None;
    }

    /// cancel is allowed from any non-terminal state.
    pub fn mark_cancelled(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn queue_time_ms(&self) -> Option<i64> {
        self.started_at.map(|s| (s - self.created_at).num_milliseconds())
    }

    pub fn execution_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds()),
            _ => None,
        }
    }
}
