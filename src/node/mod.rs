//! Node: the single point of wiring for role-dependent subsystems (spec §4.4).
//!
//! A node owns a `HealthMonitor` (resource/capability snapshots), the
//! subsystems its role activates per §4.4's table, and — for master/hybrid —
//! the worker registry and scheduler. The same run-loop shape is reused
//! across all four roles, gated by which subsystems each role activates.

pub mod command_poll;
pub mod coordinator_api;
pub mod heartbeat;
pub mod registration;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::{NodeConfig, SchedulerStrategy};
use crate::error::Result;
use crate::registry::Registry;
use crate::scheduler::{LoadBalanced, Policy, ResourceBased, RoundRobin, Scheduler, SchedulerConfig};
use crate::system::health::HealthMonitor;
use crate::types::node::{Capabilities, NodeInfo, NodeRole, NodeStatus};
use command_poll::CommandPoll;
use heartbeat::{HeartbeatOutcome, HeartbeatSubsystem};
use registration::RegistrationHandle;

fn policy_for(strategy: SchedulerStrategy) -> Box<dyn Policy> {
    match strategy {
        SchedulerStrategy::RoundRobin => Box::new(RoundRobin::default()),
        SchedulerStrategy::LeastLoaded => Box::new(LoadBalanced),
        SchedulerStrategy::ResourceAware => Box::new(ResourceBased::default()),
    }
}

/// A node, wired up according to its configured role. `Standalone` carries
/// none of the control-plane subsystems; `Master` carries only the
/// coordinator side; `Client` only the worker side; `Hybrid` both.
pub struct Node {
    pub id: String,
    pub role: NodeRole,
    config: NodeConfig,
    health: Arc<HealthMonitor>,
    catalog: Arc<Catalog>,
    registry: Option<Arc<Registry>>,
    scheduler: Option<Arc<Scheduler>>,
    registration: RwLock<Option<RegistrationHandle>>,
    shutdown: Arc<AtomicBool>,
}

impl Node {
    pub fn new(config: NodeConfig, catalog: Arc<Catalog>, gpu_capabilities: Capabilities) -> Self {
        let id = config.node.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let role = config.node.role;
        let health = Arc::new(HealthMonitor::with_gpu_capabilities(gpu_capabilities));

        let (registry, scheduler) = if role.has_coordinator_api() {
            let registry = Arc::new(Registry::new(
                config.node.master.max_queue_size,
                Duration::from_millis(config.node.master.heartbeat_timeout_ms),
            ));
            let scheduler_config = SchedulerConfig {
                task_timeout: Duration::from_millis(config.scheduler.task_timeout_ms),
                retry_on_failure: config.scheduler.retry_on_failure,
                max_retries: config.scheduler.max_retries,
            };
            let scheduler = Arc::new(Scheduler::new(registry.clone(), policy_for(config.scheduler.strategy), scheduler_config));
            (Some(registry), Some(scheduler))
        } else {
            (None, None)
        };

        Self { id, role, config, health, catalog, registry, scheduler, registration: RwLock::new(None), shutdown: Arc::new(AtomicBool::new(false)) }
    }

    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.clone()
    }

    pub fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.clone()
    }

    fn info_snapshot(&self, status: NodeStatus) -> NodeInfo {
        let now = chrono::Utc::now();
        NodeInfo {
            id: self.id.clone(),
            name: self.config.node.name.clone().unwrap_or_else(|| self.id.clone()),
            address: local_address(),
            port: self.config.node.master.bind_port,
            role: self.role,
            status,
            version: crate::version::build_info().version.to_string(),
            tags: self.config.node.tags.clone(),
            metadata: self.config.node.metadata.clone(),
            capabilities: self.health.capabilities(),
            resources: self.health.resources(),
            created_at: now,
            updated_at: now,
            last_seen: now,
        }
    }

    /// Starts every subsystem this node's role activates and returns their
    /// join handles. Does not block; callers await shutdown separately.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        if self.role.has_coordinator_api() {
            let registry = self.registry.clone().expect("coordinator-api role always builds a registry");
            let scheduler = self.scheduler.clone().expect("coordinator-api role always builds a scheduler");
            let bind_address = self.config.node.master.bind_address.clone();
            let bind_port = self.config.node.master.bind_port;
            handles.push(tokio::spawn(async move {
                if let Err(e) = coordinator_api::serve(&bind_address, bind_port, registry, scheduler).await {
                    warn!(error = %e, "coordinator API server exited");
                }
            }));

            let registry_for_timeouts = self.registry.clone().expect("coordinator-api role always builds a registry");
            let shutdown = self.shutdown.clone();
            let heartbeat_timeout = Duration::from_millis(self.config.node.master.heartbeat_timeout_ms);
            handles.push(tokio::spawn(async move {
                while !shutdown.load(Ordering::Relaxed) {
                    tokio::time::sleep(heartbeat_timeout / 2).await;
                    let timed_out = registry_for_timeouts.check_timeouts().await;
                    if !timed_out.is_empty() {
                        info!(count = timed_out.len(), "nodes marked offline after heartbeat timeout");
                    }
                }
            }));

            if self.config.node.master.subnet_scan.enabled {
                let registry_for_scan = self.registry.clone().expect("coordinator-api role always builds a registry");
                let shutdown = self.shutdown.clone();
                let scan_settings = self.config.node.master.subnet_scan.clone();
                handles.push(tokio::spawn(async move { run_subnet_scan_loop(registry_for_scan, scan_settings, shutdown).await }));
            }
        }

        if self.role.has_registration() {
            let master_url = self
                .config
                .node
                .client
                .master_url
                .clone()
                .ok_or_else(|| crate::error::Error::config_field_invalid("node.client.master_url", "required for client/hybrid roles"))?;
            let info = self.info_snapshot(NodeStatus::Online);
            let max_retries = self.config.node.client.register_retry;
            let call_timeout = Duration::from_millis(self.config.node.client.heartbeat_interval_ms);
            let handle = registration::register_with_retry(&master_url, info, max_retries, call_timeout).await?;
            info!(node_id = %handle.node_id, "registration complete");
            *self.registration.write().await = Some(handle);
        }

        if self.role.has_heartbeat() {
            let node = self.clone();
            handles.push(tokio::spawn(async move { node.run_heartbeat_loop().await }));
        }

        if self.role.has_command_poll() {
            let node = self.clone();
            handles.push(tokio::spawn(async move { node.run_command_poll_loop().await }));
        }

        Ok(handles)
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let Some(master_url) = self.config.node.client.master_url.clone() else { return };
        let subsystem = HeartbeatSubsystem::new(self.config.node.client.max_consecutive_heartbeat_failures);
        let interval = Duration::from_millis(self.config.node.client.heartbeat_interval_ms);

        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(interval).await;
            let outcome = subsystem
                .send(&master_url, &self.id, self.role, NodeStatus::Online, self.health.resources(), self.health.capabilities(), interval)
                .await;

            if let HeartbeatOutcome::ReregisterNeeded = outcome {
                warn!(node_id = %self.id, "too many missed heartbeats, re-registering");
                let info = self.info_snapshot(NodeStatus::Online);
                match registration::register_with_retry(&master_url, info, self.config.node.client.register_retry, interval).await {
                    Ok(handle) => *self.registration.write().await = Some(handle),
                    Err(e) => warn!(node_id = %self.id, error = %e, "re-registration failed"),
                }
            }
        }
    }

    async fn run_command_poll_loop(self: Arc<Self>) {
        let Some(master_url) = self.config.node.client.master_url.clone() else { return };
        let poll = CommandPoll::new(self.catalog.clone(), self.id.clone(), &self.config.node.executor);
        let interval = Duration::from_millis(self.config.node.client.command_poll_interval_ms);

        while !self.shutdown.load(Ordering::Relaxed) {
            tokio::time::sleep(interval).await;
            if let Err(e) = poll.poll_once(&master_url, interval).await {
                warn!(node_id = %self.id, error = %e, "command poll failed");
            }
        }
    }

    /// Signals subsystem loops to stop and, for client/hybrid roles,
    /// unregisters from the master (spec §5 graceful shutdown sequence).
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.registration.read().await.clone() {
            if let Some(master_url) = &self.config.node.client.master_url {
                registration::unregister(master_url, &handle.node_id, Duration::from_secs(5)).await;
            }
        }
        self.catalog.process_manager().stop_all().await;
    }
}

/// Periodically sweeps the configured CIDRs/port range and offers any
/// responding host:port as a registration hint (spec §4.6).
async fn run_subnet_scan_loop(registry: Arc<Registry>, settings: crate::config::SubnetScanSettings, shutdown: Arc<AtomicBool>) {
    let cidrs: Vec<crate::subnet::Cidr> = settings
        .cidrs
        .iter()
        .filter_map(|c| match crate::subnet::Cidr::parse(c) {
            Ok(cidr) => Some(cidr),
            Err(e) => {
                warn!(cidr = %c, error = %e, "skipping invalid subnet_scan CIDR");
                None
            }
        })
        .collect();
    if cidrs.is_empty() {
        warn!("subnet_scan enabled but no valid CIDRs configured, skipping");
        return;
    }

    let interval = Duration::from_millis(settings.interval_ms);
    let request_timeout = Duration::from_millis(settings.timeout_ms);
    let port_range = settings.port_range_start..=settings.port_range_end;

    while !shutdown.load(Ordering::Relaxed) {
        let found = crate::subnet::scan(&cidrs, port_range.clone(), request_timeout, settings.concurrency).await;
        for host in &found {
            registry.offer_hint(host.address, host.port).await;
        }
        if !found.is_empty() {
            info!(count = found.len(), "subnet scan offered candidate hosts as hints");
        }
        tokio::time::sleep(interval).await;
    }
}

/// Best-effort outbound interface address, without sending any traffic:
/// connecting a UDP socket only resolves routing, it never transmits.
fn local_address() -> String {
    use std::net::UdpSocket;
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> Arc<Catalog> {
        use crate::process::{PortAllocator, ProcessManager};
        let pm = Arc::new(ProcessManager::new("/bin", Arc::new(PortAllocator::new(24000, 24010))));
        Arc::new(Catalog::new(pm, Duration::from_millis(50)))
    }

    #[test]
    fn test_standalone_builds_no_registry_or_scheduler() {
        let mut config = NodeConfig::default();
        config.node.role = NodeRole::Standalone;
        let node = Node::new(config, test_catalog(), Capabilities::default());
        assert!(node.registry().is_none());
        assert!(node.scheduler().is_none());
    }

    #[test]
    fn test_master_builds_registry_and_scheduler() {
        let mut config = NodeConfig::default();
        config.node.role = NodeRole::Master;
        let node = Node::new(config, test_catalog(), Capabilities::default());
        assert!(node.registry().is_some());
        assert!(node.scheduler().is_some());
    }

    #[tokio::test]
    async fn test_client_role_without_master_url_fails_to_start() {
        let mut config = NodeConfig::default();
        config.node.role = NodeRole::Client;
        config.node.client.master_url = None;
        let node = Arc::new(Node::new(config, test_catalog(), Capabilities::default()));
        let err = node.start().await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigValidation);
    }
}
