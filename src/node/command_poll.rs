//! Command-poll subsystem: pulls queued commands, validates and dispatches
//! them, and always produces a `CommandResult` (spec §4.4.3, §7 propagation
//! policy — a command that can't be executed still yields a failure result,
//! never a silent drop).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tracing::warn;

use crate::catalog::Catalog;
use crate::config::ExecutorSettings;
use crate::error::{Error, Result};
use crate::node::wire::{call, ControlRequest, ControlResponse};
use crate::process::LoadRequest;
use crate::types::message::{Command, CommandResult, CommandType};

/// Executes commands addressed to one node and reports results back to its
/// master.
pub struct CommandPoll {
    catalog: Arc<Catalog>,
    node_id: String,
    allowed_commands: HashSet<CommandType>,
    allow_remote_stop: bool,
    max_concurrent: usize,
}

impl CommandPoll {
    pub fn new(catalog: Arc<Catalog>, node_id: impl Into<String>, executor: &ExecutorSettings) -> Self {
        Self {
            catalog,
            node_id: node_id.into(),
            allowed_commands: executor.allowed_commands.iter().copied().collect(),
            allow_remote_stop: executor.allow_remote_stop,
            max_concurrent: executor.max_concurrent.max(1) as usize,
        }
    }

    /// One poll cycle: fetch pending commands, run each (bounded by
    /// `executor.maxConcurrent`), post its result. Commands not addressed to
    /// this node are rejected without executing.
    pub async fn poll_once(&self, master_url: &str, call_timeout: Duration) -> Result<usize> {
        let commands = match call(master_url, &ControlRequest::PollCommands { node_id: self.node_id.clone() }, call_timeout).await? {
            ControlResponse::Commands { commands } => commands,
            _ => Vec::new(),
        };

        let count = commands.len();
        stream::iter(commands)
            .for_each_concurrent(self.max_concurrent, |command| async move {
                let result = self.execute(command).await;
                if let Err(e) = call(master_url, &ControlRequest::PostResult { result }, call_timeout).await {
                    warn!(node_id = %self.node_id, error = %e, "failed to post command result");
                }
            })
            .await;
        Ok(count)
    }

    async fn execute(&self, command: Command) -> CommandResult {
        if command.to_node_id != self.node_id {
            return CommandResult::failure(
                command.id,
                self.node_id.clone(),
                command.from_node_id,
                "command addressed to a different node",
                0,
            );
        }

        if let Err(e) = self.check_allowed(command.command_type) {
            return CommandResult::failure(command.id, self.node_id.clone(), command.from_node_id, e.to_string(), 0);
        }

        let started = Instant::now();
        let outcome = self.dispatch_with_retry(&command).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(value) => CommandResult::success(command.id, self.node_id.clone(), command.from_node_id, value, duration_ms),
            Err(e) => CommandResult::failure(command.id, self.node_id.clone(), command.from_node_id, e.to_string(), duration_ms),
        }
    }

    /// Checks a command type against the configured allow-list and the
    /// `allowRemoteStop` gate before dispatch (spec §4.4.3). Forbidden
    /// commands are a permanent failure: no retry.
    fn check_allowed(&self, command_type: CommandType) -> Result<()> {
        if !self.allow_remote_stop && matches!(command_type, CommandType::UnloadModel | CommandType::StopProcess) {
            return Err(Error::command_forbidden(format!("{command_type:?}")));
        }
        if !self.allowed_commands.contains(&command_type) {
            return Err(Error::command_forbidden(format!("{command_type:?}")));
        }
        Ok(())
    }

    /// Runs `dispatch`, retrying transient failures up to `command.max_retries`
    /// times (spec §4.4.3); permanent failures (unknown type, forbidden,
    /// invalid payload) are returned immediately.
    async fn dispatch_with_retry(&self, command: &Command) -> Result<serde_json::Value> {
        let mut attempt = 0;
        loop {
            match self.dispatch(command).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < command.max_retries => {
                    attempt += 1;
                    warn!(
                        node_id = %self.node_id,
                        command_id = %command.id,
                        attempt,
                        error = %e,
                        "retrying command after transient failure"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&self, command: &Command) -> Result<serde_json::Value> {
        match command.command_type {
            CommandType::LoadModel | CommandType::RunLlamacpp => {
                let req: LoadRequest = serde_json::from_value(command.payload.clone())
                    .map_err(|e| crate::error::Error::ProtocolMalformed { message: e.to_string() })?;
                let status = self.catalog.load(req, "node").await?;
                Ok(serde_json::to_value(status).unwrap_or_default())
            }
            CommandType::UnloadModel | CommandType::StopProcess => {
                let model_id = command
                    .payload
                    .get("modelId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| crate::error::Error::ProtocolMalformed { message: "missing modelId".into() })?;
                self.catalog.unload(model_id).await?;
                Ok(serde_json::json!({ "stopped": model_id }))
            }
            CommandType::ScanModels => {
                let paths = self.catalog.list().await.into_iter().map(|m| m.path_prefix).collect::<std::collections::HashSet<_>>();
                let paths: Vec<_> = paths.into_iter().collect();
                let result = self.catalog.scan(&paths).await?;
                Ok(serde_json::json!({ "modelCount": result.models.len(), "errors": result.errors }))
            }
            CommandType::TestLlamacpp => {
                let port = command.payload.get("port").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
                let healthy = crate::process::probe_health(port, Duration::from_secs(5)).await;
                Ok(serde_json::json!({ "healthy": healthy }))
            }
            CommandType::CollectLogs | CommandType::GetConfig => {
                Err(crate::error::Error::NotSupported(format!("{:?} is not implemented by this node", command.command_type)))
            }
        }
    }
}
