//! Node identity and capability types (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role a node plays in the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// No coordination: a solitary host that loads and serves models locally.
    Standalone,
    /// Tracks worker nodes and dispatches commands to them.
    Master,
    /// Registers with a master and executes commands it sends.
    Client,
    /// Both master and client simultaneously.
    Hybrid,
}

impl NodeRole {
    /// Whether this role runs the registration subsystem.
    pub fn has_registration(&self) -> bool {
        matches!(self, NodeRole::Client | NodeRole::Hybrid)
    }

    /// Whether this role runs the heartbeat subsystem.
    pub fn has_heartbeat(&self) -> bool {
        matches!(self, NodeRole::Client | NodeRole::Hybrid)
    }

    /// Whether this role runs the command-poll subsystem.
    pub fn has_command_poll(&self) -> bool {
        matches!(self, NodeRole::Client | NodeRole::Hybrid)
    }

    /// Whether this role accepts registrations/heartbeats/results from others.
    pub fn has_coordinator_api(&self) -> bool {
        matches!(self, NodeRole::Master | NodeRole::Hybrid)
    }
}

/// Liveness/availability status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Error,
}

/// Per-GPU snapshot, part of `Resources.gpu_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    pub vendor: String,
    pub total_memory: u64,
    pub used_memory: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub utilization: Option<f32>,
    #[serde(default)]
    pub power_usage: Option<f32>,
    #[serde(default)]
    pub driver_version: Option<String>,
}

/// Static hardware/software capability set of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub gpu: bool,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub gpu_names: Vec<String>,
    #[serde(default)]
    pub gpu_memory_total: u64,
    pub cpu_count: u32,
    pub memory_total: u64,
    #[serde(default)]
    pub supports_llama: bool,
    #[serde(default)]
    pub supports_python: bool,
    #[serde(default)]
    pub conda_environments: Vec<String>,
}

/// Instantaneous resource usage snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    /// CPU used, in milli-cores.
    pub cpu_used: u64,
    /// CPU total, in milli-cores.
    pub cpu_total: u64,
    pub memory_used: u64,
    pub memory_total: u64,
    #[serde(default)]
    pub gpu_info: Vec<GpuInfo>,
    pub disk_used: u64,
    pub disk_total: u64,
    /// 1/5/15-minute load averages.
    #[serde(default)]
    pub load_average: [f64; 3],
    #[serde(default)]
    pub kernel_version: Option<String>,
    #[serde(default)]
    pub rocm_version: Option<String>,
}

impl Resources {
    /// CPU utilization in [0, 1]; 0 if `cpu_total` is unknown.
    pub fn cpu_utilization(&self) -> f64 {
        if self.cpu_total == 0 {
            0.0
        } else {
            self.cpu_used as f64 / self.cpu_total as f64
        }
    }

    /// Memory utilization in [0, 1]; 0 if `memory_total` is unknown.
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_total == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_total as f64
        }
    }

    pub fn memory_available_gb(&self) -> f64 {
        self.memory_total.saturating_sub(self.memory_used) as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn cpu_available_cores(&self) -> f64 {
        self.cpu_total.saturating_sub(self.cpu_used) as f64 / 1000.0
    }

    pub fn gpu_memory_available_gb(&self) -> f64 {
        self.gpu_info
            .iter()
            .map(|g| g.total_memory.saturating_sub(g.used_memory))
            .sum::<u64>() as f64
            / (1024.0 * 1024.0 * 1024.0)
    }

    /// 1-minute load average divided by core count, clamped to [0, 1]; 0 if
    /// the core count is unknown.
    pub fn normalized_load_average(&self) -> f64 {
        let cores = self.cpu_total as f64 / 1000.0;
        if cores <= 0.0 {
            0.0
        } else {
            (self.load_average[0] / cores).clamp(0.0, 1.0)
        }
    }
}

/// Full identity record for a node, as held in the worker registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub capabilities: Capabilities,
    pub resources: Resources,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl NodeInfo {
    pub fn is_stale(&self, timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_seen > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_subsystems() {
        assert!(!NodeRole::Standalone.has_registration());
        assert!(NodeRole::Client.has_registration());
        assert!(NodeRole::Client.has_heartbeat());
        assert!(!NodeRole::Client.has_coordinator_api());
        assert!(NodeRole::Master.has_coordinator_api());
        assert!(NodeRole::Hybrid.has_registration() && NodeRole::Hybrid.has_coordinator_api());
    }

    #[test]
    fn test_resources_utilization() {
        let r = Resources {
            cpu_used: 1000,
            cpu_total: 8000,
            memory_used: 4 * 1024 * 1024 * 1024,
            memory_total: 16 * 1024 * 1024 * 1024,
            ..Default::default()
        };
        assert!((r.cpu_utilization() - 0.125).abs() < 1e-9);
        assert!((r.memory_utilization() - 0.25).abs() < 1e-9);
        assert!((r.cpu_available_cores() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_is_stale() {
        let now = Utc::now();
        let mut node = NodeInfo {
            id: "n1".into(),
            name: "n1".into(),
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
        };
        assert!(!node.is_stale(chrono::Duration::seconds(30), now));
        node.last_seen = now - chrono::Duration::seconds(60);
        assert!(node.is_stale(chrono::Duration::seconds(30), now));
    }
}
