//! System health and resource monitoring
//!
//! Collects the `Capabilities`/`Resources` snapshot a node folds into its
//! heartbeats and registration payload (spec §3, §4.4.2).

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::types::node::{Capabilities, Resources};

// ─────────────────────────────────────────────────────────────────
// System Info
// ─────────────────────────────────────────────────────────────────

/// System information collected at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Number of CPU cores
    pub cpu_count: usize,

    /// Total system memory (MB)
    pub total_memory_mb: u64,

    /// Operating system name
    pub os_name: String,

    /// OS version
    pub os_version: String,

    /// CPU architecture
    pub arch: String,

    /// Hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Collect system information
    pub fn collect() -> Self {
        Self {
            cpu_count: num_cpus::get(),
            total_memory_mb: get_total_memory_mb(),
            os_name: std::env::consts::OS.to_string(),
            os_version: get_os_version(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: get_hostname(),
        }
    }
}

/// Get total system memory in MB
fn get_total_memory_mb() -> u64 {
    #[cfg(target_os = "windows")]
    {
        8192
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/meminfo") {
            for line in content.lines() {
                if line.starts_with("MemTotal:") {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    if parts.len() >= 2 {
                        if let Ok(kb) = parts[1].parse::<u64>() {
                            return kb / 1024;
                        }
                    }
                }
            }
        }
        8192 // Default fallback
    }
}

/// Get OS version string
fn get_os_version() -> String {
    #[cfg(target_os = "windows")]
    {
        "Windows".to_string()
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("PRETTY_NAME="))
                    .map(|l| l.trim_start_matches("PRETTY_NAME=").trim_matches('"').to_string())
            })
            .unwrap_or_else(|| "Linux".to_string())
    }

    #[cfg(target_os = "macos")]
    {
        "macOS".to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Unknown".to_string()
    }
}

/// Get hostname
fn get_hostname() -> String {
    hostname::get().map(|h| h.to_string_lossy().to_string()).unwrap_or_else(|_| "unknown".to_string())
}

// ─────────────────────────────────────────────────────────────────
// Health Monitor
// ─────────────────────────────────────────────────────────────────

/// Monitors system health and produces the resource/capability snapshot
/// carried by heartbeats and registration.
pub struct HealthMonitor {
    system_info: SystemInfo,
    start_time: Instant,
    gpu_capabilities: Capabilities,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_gpu_capabilities(Capabilities::default())
    }

    /// Builds a monitor seeded with GPU capability facts already detected
    /// elsewhere (spec §4.1 `gpu::detect`), since this module owns CPU/memory
    /// only.
    pub fn with_gpu_capabilities(gpu_capabilities: Capabilities) -> Self {
        Self { system_info: SystemInfo::collect(), start_time: Instant::now(), gpu_capabilities }
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.system_info
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Static capability set this node advertises at registration time.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            cpu_count: self.system_info.cpu_count as u32,
            memory_total: self.system_info.total_memory_mb * 1024 * 1024,
            supports_llama: true,
            ..self.gpu_capabilities.clone()
        }
    }

    /// Instantaneous resource snapshot this node reports in each heartbeat.
    pub fn resources(&self) -> Resources {
        let memory_used = self.get_memory_used_mb() * 1024 * 1024;
        Resources {
            cpu_used: (self.get_cpu_usage() / 100.0 * self.system_info.cpu_count as f64 * 1000.0) as u64,
            cpu_total: self.system_info.cpu_count as u64 * 1000,
            memory_used,
            memory_total: self.system_info.total_memory_mb * 1024 * 1024,
            gpu_info: vec![],
            disk_used: 0,
            disk_total: 0,
            load_average: get_load_average(),
            kernel_version: None,
            rocm_version: None,
        }
    }

    /// CPU usage percentage (0-100). A full implementation would sample
    /// `/proc/stat` deltas over an interval; this is a point-in-time
    /// placeholder until the resource monitor wires that up.
    fn get_cpu_usage(&self) -> f64 {
        0.0
    }

    fn get_memory_used_mb(&self) -> u64 {
        #[cfg(target_os = "linux")]
        {
            if let Ok(content) = std::fs::read_to_string("/proc/self/statm") {
                let parts: Vec<&str> = content.split_whitespace().collect();
                if let Some(pages_str) = parts.get(1) {
                    if let Ok(pages) = pages_str.parse::<u64>() {
                        return (pages * 4) / 1024;
                    }
                }
            }
        }
        256
    }

    pub fn is_healthy(&self) -> bool {
        let resources = self.resources();
        if resources.memory_available_gb() * 1024.0 < 512.0 {
            return false;
        }
        resources.cpu_utilization() <= 0.95
    }

    pub fn health_status(&self) -> HealthStatus {
        let resources = self.resources();
        let memory_available_mb = (resources.memory_available_gb() * 1024.0) as u64;
        let cpu_percent = resources.cpu_utilization() * 100.0;

        HealthStatus {
            healthy: self.is_healthy(),
            message: if self.is_healthy() { "System healthy".to_string() } else { "System resources critically low".to_string() },
            checks: vec![
                HealthCheck {
                    name: "memory".to_string(),
                    passed: memory_available_mb >= 512,
                    detail: Some(format!("{memory_available_mb}MB available")),
                },
                HealthCheck {
                    name: "cpu".to_string(),
                    passed: cpu_percent <= 95.0,
                    detail: Some(format!("{cpu_percent:.1}% usage")),
                },
            ],
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn get_load_average() -> [f64; 3] {
    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|content| {
            let parts: Vec<&str> = content.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            Some([parts[0].parse().ok()?, parts[1].parse().ok()?, parts[2].parse().ok()?])
        })
        .unwrap_or([0.0, 0.0, 0.0])
}

#[cfg(not(target_os = "linux"))]
fn get_load_average() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}

// ─────────────────────────────────────────────────────────────────
// Health Status
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub checks: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_info_collect() {
        let info = SystemInfo::collect();
        assert!(info.cpu_count > 0);
        assert!(info.total_memory_mb > 0);
        assert!(!info.os_name.is_empty());
    }

    #[test]
    fn test_health_monitor_resources_and_capabilities() {
        let monitor = HealthMonitor::new();
        assert!(monitor.uptime_secs() < 1);

        let resources = monitor.resources();
        assert!(resources.memory_total > 0);

        let capabilities = monitor.capabilities();
        assert!(capabilities.cpu_count > 0);
        assert!(capabilities.supports_llama);
    }

    #[test]
    fn test_health_status() {
        let monitor = HealthMonitor::new();
        let status = monitor.health_status();
        assert!(!status.checks.is_empty());
    }
}
