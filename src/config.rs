//! Configuration system for Shepherd
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (SHEPHERD_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::message::CommandType;
use crate::types::node::NodeRole;

/// Root Shepherd configuration (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub scheduler: SchedulerSettings,
    pub models: ModelsSettings,
    pub ports: PortSettings,
    pub logging: LoggingSettings,
}

/// Node identity, role, and per-role subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: NodeRole,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub master: MasterRoleSettings,
    pub client: ClientRoleSettings,
    pub resources: ResourceSettings,
    pub executor: ExecutorSettings,
    pub capabilities: CapabilitiesSettings,
}

/// Settings for the coordinator-api subsystem (spec §4.4's master/hybrid table row).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterRoleSettings {
    pub bind_address: String,
    pub bind_port: u16,
    pub heartbeat_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    pub subnet_scan: SubnetScanSettings,
}

/// Optional periodic discovery sweep a master/hybrid node can run to offer
/// candidate workers as hints (spec §4.6). Disabled by default: a node still
/// needs its worker fleet to complete explicit registration regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetScanSettings {
    pub enabled: bool,
    pub cidrs: Vec<String>,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub concurrency: usize,
}

impl Default for SubnetScanSettings {
    fn default() -> Self {
        Self { enabled: false, cidrs: Vec::new(), port_range_start: 8081, port_range_end: 9000, interval_ms: 300_000, timeout_ms: 500, concurrency: 64 }
    }
}

/// Settings for the registration/heartbeat/command-poll subsystems (spec §4.4.1-4.4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientRoleSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_url: Option<String>,
    pub register_retry: u32,
    pub heartbeat_interval_ms: u64,
    pub max_consecutive_heartbeat_failures: u32,
    pub command_poll_interval_ms: u64,
}

/// Soft resource limits the node enforces on itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub max_memory_mb: u64,
    pub max_gpu_memory_mb: u64,
    pub max_gpu_percent: u8,
    pub max_threads: u32,
    pub enable_gpu: bool,
}

/// Where the node finds the inference binary and its shared libraries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub bin_dir: String,
    pub readiness_timeout_ms: u64,
    pub graceful_stop_timeout_ms: u64,
    pub max_concurrent: u32,
    pub task_timeout_ms: u64,
    pub allow_remote_stop: bool,
    pub allowed_commands: Vec<CommandType>,
}

/// Static capability overrides; auto-detected values are used when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_override: Option<bool>,
    #[serde(default)]
    pub conda_environments: Vec<String>,
}

/// Node-selection policy configuration (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub strategy: SchedulerStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    pub task_timeout_ms: u64,
    pub retry_on_failure: bool,
    pub max_retries: u32,
}

/// Scheduling strategies a master/hybrid node can run (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStrategy {
    RoundRobin,
    LeastLoaded,
    ResourceAware,
}

impl Default for SchedulerStrategy {
    fn default() -> Self {
        SchedulerStrategy::LeastLoaded
    }
}

/// Per-path model directory overrides plus scan cadence (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSettings {
    pub paths: Vec<String>,
    #[serde(default)]
    pub path_configs: HashMap<String, PathConfig>,
    pub auto_scan: bool,
    pub scan_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub recursive: bool,
}

/// Port allocator range (spec §6: base=8081, max=9000).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    pub base: u16,
    pub max: u16,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub max_file_size_mb: u64,
    pub max_files: u32,
    pub json_format: bool,
}

// ─────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            scheduler: SchedulerSettings::default(),
            models: ModelsSettings::default(),
            ports: PortSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            role: NodeRole::Standalone,
            tags: vec![],
            metadata: HashMap::new(),
            master: MasterRoleSettings::default(),
            client: ClientRoleSettings::default(),
            resources: ResourceSettings::default(),
            executor: ExecutorSettings::default(),
            capabilities: CapabilitiesSettings::default(),
        }
    }
}

impl Default for MasterRoleSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 7700,
            heartbeat_timeout_ms: 90_000,
            max_queue_size: Some(256),
            subnet_scan: SubnetScanSettings::default(),
        }
    }
}

impl Default for ClientRoleSettings {
    fn default() -> Self {
        Self {
            master_url: None,
            register_retry: 5,
            heartbeat_interval_ms: 15_000,
            max_consecutive_heartbeat_failures: 3,
            command_poll_interval_ms: 2_000,
        }
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self { max_memory_mb: 0, max_gpu_memory_mb: 0, max_gpu_percent: 100, max_threads: 0, enable_gpu: true }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            bin_dir: "~/.shepherd/bin".to_string(),
            readiness_timeout_ms: 120_000,
            graceful_stop_timeout_ms: 5_000,
            max_concurrent: 1,
            task_timeout_ms: 120_000,
            allow_remote_stop: true,
            allowed_commands: vec![
                CommandType::LoadModel,
                CommandType::UnloadModel,
                CommandType::RunLlamacpp,
                CommandType::StopProcess,
                CommandType::ScanModels,
                CommandType::CollectLogs,
                CommandType::TestLlamacpp,
                CommandType::GetConfig,
            ],
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            strategy: SchedulerStrategy::default(),
            max_queue_size: None,
            task_timeout_ms: 120_000,
            retry_on_failure: true,
            max_retries: 3,
        }
    }
}

impl Default for ModelsSettings {
    fn default() -> Self {
        Self {
            paths: vec!["~/.shepherd/models".to_string()],
            path_configs: HashMap::new(),
            auto_scan: true,
            scan_interval_ms: 300_000,
        }
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        Self { base: 8081, max: 9000 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None, max_file_size_mb: 100, max_files: 5, json_format: false }
    }
}

// ─────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from file with environment variable overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead { path: path.clone(), source: e })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse { message: e.to_string(), source: Some(e) })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            return if path.exists() {
                Ok(Some(path))
            } else {
                Err(Error::config_not_found(path))
            };
        }

        let search_paths = [
            PathBuf::from("shepherd.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir().map(|p| p.join("shepherd").join("config.toml")).unwrap_or_default(),
            dirs::home_dir().map(|p| p.join(".shepherd").join("config.toml")).unwrap_or_default(),
            PathBuf::from("/etc/shepherd/config.toml"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SHEPHERD_NODE_ID") {
            self.node.id = Some(val);
        }
        if let Ok(val) = std::env::var("SHEPHERD_NODE_NAME") {
            self.node.name = Some(val);
        }
        if let Ok(val) = std::env::var("SHEPHERD_NODE_ROLE") {
            match val.to_lowercase().as_str() {
                "standalone" => self.node.role = NodeRole::Standalone,
                "master" => self.node.role = NodeRole::Master,
                "client" => self.node.role = NodeRole::Client,
                "hybrid" => self.node.role = NodeRole::Hybrid,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("SHEPHERD_MASTER_URL") {
            self.node.client.master_url = Some(val);
        }
        if let Ok(val) = std::env::var("SHEPHERD_MASTER_BIND_PORT") {
            if let Ok(n) = val.parse() {
                self.node.master.bind_port = n;
            }
        }

        if let Ok(val) = std::env::var("SHEPHERD_MAX_MEMORY_MB") {
            if let Ok(n) = val.parse() {
                self.node.resources.max_memory_mb = n;
            }
        }
        if let Ok(val) = std::env::var("SHEPHERD_MAX_THREADS") {
            if let Ok(n) = val.parse() {
                self.node.resources.max_threads = n;
            }
        }
        if let Ok(val) = std::env::var("SHEPHERD_ENABLE_GPU") {
            self.node.resources.enable_gpu = is_truthy(&val);
        }

        if let Ok(val) = std::env::var("SHEPHERD_BIN_DIR") {
            self.node.executor.bin_dir = val;
        }

        if let Ok(val) = std::env::var("SHEPHERD_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SHEPHERD_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("SHEPHERD_LOG_JSON") {
            self.logging.json_format = is_truthy(&val);
        }

        if let Ok(val) = std::env::var("SHEPHERD_MODEL_PATHS") {
            self.models.paths = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = std::env::var("SHEPHERD_PORT_BASE") {
            if let Ok(n) = val.parse() {
                self.ports.base = n;
            }
        }
        if let Ok(val) = std::env::var("SHEPHERD_PORT_MAX") {
            if let Ok(n) = val.parse() {
                self.ports.max = n;
            }
        }
    }

    fn expand_paths(&mut self) {
        self.node.executor.bin_dir = expand_path(&self.node.executor.bin_dir);
        self.models.paths = self.models.paths.iter().map(|p| expand_path(p)).collect();
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.node.role.has_registration() && self.node.client.master_url.is_none() {
            return Err(Error::config_field_invalid(
                "node.client.master_url",
                "client and hybrid roles require node.client.master_url",
            ));
        }

        if self.node.resources.max_gpu_percent > 100 {
            return Err(Error::config_field_invalid(
                "node.resources.max_gpu_percent",
                "must be between 0 and 100",
            ));
        }

        if self.ports.base > self.ports.max {
            return Err(Error::config_field_invalid("ports", "base must be <= max"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!("invalid log level '{}'; must be one of: {}", self.logging.level, valid_levels.join(", ")),
            ));
        }

        Ok(())
    }

    pub fn bin_dir(&self) -> PathBuf {
        PathBuf::from(&self.node.executor.bin_dir)
    }

    pub fn model_paths(&self) -> Vec<PathBuf> {
        self.models.paths.iter().map(PathBuf::from).collect()
    }
}

/// Writes a commented default configuration to `path` (or `shepherd.toml` in
/// the current directory), refusing to overwrite an existing file unless
/// `force` is set.
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let path = PathBuf::from(path.unwrap_or("shepherd.toml"));
    if path.exists() && !force {
        return Err(Error::config_field_invalid("path", format!("'{}' already exists; pass --force to overwrite", path.display())));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite { path: parent.to_path_buf(), source: e })?;
        }
    }

    let default_config = NodeConfig::default();
    let toml_str = toml::to_string_pretty(&default_config).map_err(|e| Error::Config(format!("failed to serialize default configuration: {e}")))?;
    fs::write(&path, toml_str).map_err(|e| Error::IoWrite { path: path.clone(), source: e })?;

    Ok(path)
}

fn is_truthy(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn expand_path(path: &str) -> String {
    shellexpand::full(path).unwrap_or_else(|_| std::borrow::Cow::Borrowed(path)).into_owned()
}
