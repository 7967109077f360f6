//! Task scheduling: candidate filtering, policy-based dispatch, and
//! retry/timeout lifecycle (spec §4.5).
//!
//! Dispatch is a queue-and-await-result model keyed by command id rather
//! than a direct in-process call: `submit_task` queues a command on the
//! target node and blocks on a timeout-wrapped oneshot channel until the
//! matching result arrives.

pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::message::{Command, CommandResult, CommandType};
use crate::types::node::NodeStatus;
use crate::types::task::{Task, TaskStatus};

pub use policy::{LoadBalanced, Locality, Policy, ResourceBased, RoundRobin, TaskRequirements};

/// Scheduler configuration (spec §6 `scheduler{...}`).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub task_timeout: Duration,
    pub retry_on_failure: bool,
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { task_timeout: Duration::from_secs(120), retry_on_failure: true, max_retries: 3 }
    }
}

/// Dispatches tasks to nodes via a `Policy`, tracks their lifecycle, and
/// resolves a submitter's future once a `CommandResult` arrives.
pub struct Scheduler {
    registry: Arc<Registry>,
    policy: Box<dyn Policy>,
    config: SchedulerConfig,
    tasks: RwLock<HashMap<String, Task>>,
    waiters: RwLock<HashMap<String, oneshot::Sender<CommandResult>>>,
}

impl Scheduler {
    pub fn new(registry: Arc<Registry>, policy: Box<dyn Policy>, config: SchedulerConfig) -> Self {
        Self { registry, policy, config, tasks: RwLock::new(HashMap::new()), waiters: RwLock::new(HashMap::new()) }
    }

    /// SubmitTask: if `preferred_node_id` is set and online, bypass the
    /// policy entirely; otherwise filter candidates by `req` and pick one.
    pub async fn submit_task(
        &self,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        req: TaskRequirements,
        preferred_node_id: Option<String>,
    ) -> Result<Task> {
        let mut task = Task::new(
            task_type,
            payload.clone(),
            self.config.task_timeout.as_millis() as u64,
            self.config.max_retries,
            0,
        );

        let node_id = match preferred_node_id {
            Some(id) => {
                let node = self.registry.get(&id).await.ok_or_else(|| Error::node_not_found(&id))?;
                if node.status == NodeStatus::Offline {
                    return Err(Error::NoSuitableNode { task_id: task.id.clone() });
                }
                id
            }
            None => {
                let online = self.registry.list_online().await;
                let candidates: Vec<_> = online.into_iter().filter(|n| req.is_satisfied_by(n)).collect();
                if candidates.is_empty() {
                    return Err(Error::NoSuitableNode { task_id: task.id.clone() });
                }
                self.policy.pick(&candidates, &req)?
            }
        };

        self.dispatch(&mut task, &node_id, vec![]).await?;
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn dispatch(&self, task: &mut Task, node_id: &str, excluded: Vec<String>) -> Result<()> {
        task.mark_running(node_id.to_string());

        let command = Command::new(
            CommandType::RunLlamacpp,
            json!({ "taskId": task.id, "type": task.task_type, "payload": task.payload }),
            "scheduler",
            node_id,
        );

        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(command.id.clone(), tx);
        self.registry.queue_command(command.clone()).await?;

        let deadline = self.config.task_timeout;
        let task_id = task.id.clone();
        match timeout(deadline, rx).await {
            Ok(Ok(result)) => {
                if result.success {
                    task.mark_completed(result.result.unwrap_or(serde_json::Value::Null));
                    Ok(())
                } else {
                    self.handle_failure(task, node_id, excluded, result.error).await
                }
            }
            Ok(Err(_)) => self.handle_failure(task, node_id, excluded, Some("result channel closed".into())).await,
            Err(_) => {
                warn!(task_id = %task_id, node_id, "task timed out");
                self.waiters.write().await.remove(&command.id);
                self.handle_failure(task, node_id, excluded, Some("timed out".into())).await
            }
        }
    }

    async fn handle_failure(
        &self,
        task: &mut Task,
        failed_node_id: &str,
        mut excluded: Vec<String>,
        error: Option<String>,
    ) -> Result<()> {
        excluded.push(failed_node_id.to_string());

        if self.config.retry_on_failure && task.can_retry() && task.max_retries >= excluded.len() as u32 {
            task.reset_for_retry();
            let online = self.registry.list_online().await;
            let candidates: Vec<_> = online.into_iter().filter(|n| !excluded.contains(&n.id)).collect();
            if let Ok(node_id) = self.policy.pick(&candidates, &TaskRequirements::default()) {
                info!(task_id = %task.id, node_id, "retrying task on a different node");
                return Box::pin(self.dispatch(task, &node_id, excluded)).await;
            }
        }

        task.mark_failed(error.unwrap_or_else(|| "task failed with no error detail".to_string()));
        Ok(())
    }

    /// Called by the command-poll/coordinator-api subsystem when a
    /// `CommandResult` for a dispatched task arrives.
    pub async fn resolve_command_result(&self, result: CommandResult) {
        if let Some(tx) = self.waiters.write().await.remove(&result.command_id) {
            let _ = tx.send(result);
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// CancelTask: best-effort. Marks the task cancelled locally; the
    /// assigned node is sent a stop/unload command but its outcome does not
    /// block cancellation (spec §9A decision 3).
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(task_id).ok_or_else(|| Error::NoSuitableNode { task_id: task_id.to_string() })?;

        if !task.mark_cancelled() {
            return Ok(());
        }

        if let Some(node_id) = task.assigned_node_id.clone() {
            let command = Command::new(CommandType::StopProcess, json!({ "taskId": task_id }), "scheduler", &node_id);
            let _ = self.registry.queue_command(command).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node::{Capabilities, NodeInfo, NodeRole, Resources};

    async fn registry_with_online_node(id: &str) -> Arc<Registry> {
        let registry = Arc::new(Registry::new(None, Duration::from_secs(30)));
        let now = chrono::Utc::now();
        registry
            .register(NodeInfo {
                id: id.to_string(),
                name: id.to_string(),
                address: "127.0.0.1".into(),
                port: 9000,
                role: NodeRole::Client,
                status: crate::types::node::NodeStatus::Online,
                version: "0.1.0".into(),
                tags: vec![],
                metadata: HashMap::new(),
                capabilities: Capabilities::default(),
                resources: Resources { cpu_total: 8000, memory_total: 16 * 1024 * 1024 * 1024, ..Default::default() },
                created_at: now,
                updated_at: now,
                last_seen: now,
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_submit_task_no_candidates_errors() {
        let registry = Arc::new(Registry::new(None, Duration::from_secs(30)));
        let scheduler = Scheduler::new(registry, Box::new(LoadBalanced), SchedulerConfig::default());
        let err = scheduler
            .submit_task("inference", json!({}), TaskRequirements::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NoSuitableNode);
    }

    #[tokio::test]
    async fn test_submit_task_preferred_offline_node_yields_no_suitable_node() {
        let registry = Arc::new(Registry::new(None, Duration::from_secs(30)));
        let now = chrono::Utc::now();
        registry
            .register(NodeInfo {
                id: "n1".into(),
                name: "n1".into(),
                address: "127.0.0.1".into(),
                port: 9000,
                role: NodeRole::Client,
                status: crate::types::node::NodeStatus::Offline,
                version: "0.1.0".into(),
                tags: vec![],
                metadata: HashMap::new(),
                capabilities: Capabilities::default(),
                resources: Resources::default(),
                created_at: now,
                updated_at: now,
                last_seen: now,
            })
            .await
            .unwrap();
        let scheduler = Scheduler::new(registry, Box::new(LoadBalanced), SchedulerConfig::default());
        let err = scheduler
            .submit_task("inference", json!({}), TaskRequirements::default(), Some("n1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NoSuitableNode);
    }

    #[tokio::test]
    async fn test_submit_task_times_out_and_marks_failed_when_retry_exhausted() {
        let registry = registry_with_online_node("n1").await;
        let config = SchedulerConfig { task_timeout: Duration::from_millis(20), retry_on_failure: false, max_retries: 0 };
        let scheduler = Scheduler::new(registry, Box::new(LoadBalanced), config);

        let task = scheduler
            .submit_task("inference", json!({}), TaskRequirements::default(), None)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_task_marks_cancelled() {
        let registry = registry_with_online_node("n1").await;
        let config = SchedulerConfig { task_timeout: Duration::from_millis(5000), retry_on_failure: false, max_retries: 0 };
        let scheduler = Arc::new(Scheduler::new(registry, Box::new(LoadBalanced), config));

        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(async move {
            scheduler_clone.submit_task("inference", json!({}), TaskRequirements::default(), None).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let tasks = scheduler.list_tasks().await;
        if let Some(task) = tasks.first() {
            scheduler.cancel_task(&task.id).await.unwrap();
        }
        let _ = handle.await;
    }

    /// Scenario: QueueCommand -> a client polls -> executes -> PostResult.
    /// The task transitions pending -> running -> completed carrying the
    /// polled command's result.
    #[tokio::test]
    async fn test_command_round_trip_completes_task() {
        let registry = registry_with_online_node("n1").await;
        let config = SchedulerConfig { task_timeout: Duration::from_secs(5), retry_on_failure: false, max_retries: 0 };
        let scheduler = Arc::new(Scheduler::new(registry.clone(), Box::new(LoadBalanced), config));

        let scheduler_clone = scheduler.clone();
        let handle = tokio::spawn(async move {
            scheduler_clone.submit_task("inference", json!({"prompt": "hi"}), TaskRequirements::default(), None).await
        });

        let command = loop {
            let pending = registry.get_pending_commands("n1").await.unwrap();
            if let Some(command) = pending.into_iter().next() {
                break command;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert_eq!(command.to_node_id, "n1");

        let result = CommandResult::success(command.id, "n1", "scheduler", json!({"text": "hello"}), 12);
        scheduler.resolve_command_result(result).await;

        let task = handle.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"text": "hello"})));
    }
}
