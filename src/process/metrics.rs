//! Per-process CPU/memory sampling via `/proc/<pid>/{stat,statm}` (spec §4.2
//! "Per-process metrics"), generalizing the self-only `/proc` idiom in
//! `system/health.rs` to an arbitrary pid, and an optional HTTP readiness
//! probe against `GET /health`.

use std::time::Duration;

/// A single sample of a supervised process's resource usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMetrics {
    pub cpu_time_ticks: u64,
    pub rss_kb: u64,
}

/// Read `/proc/<pid>/stat` (utime+stime, fields 14-15) and `/proc/<pid>/statm`
/// (resident pages, field 2) for a single point-in-time sample. Returns
/// `None` on any platform other than Linux, or if the process has already
/// exited.
pub fn sample(pid: u32) -> Option<ProcessMetrics> {
    #[cfg(target_os = "linux")]
    {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let after_comm = stat.rsplit_once(')')?.1;
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        // fields[0] is state (3rd overall); utime/stime are the 14th/15th
        // overall fields, i.e. index 11/12 here.
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;

        let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        let page_size_kb = 4;

        Some(ProcessMetrics { cpu_time_ticks: utime + stime, rss_kb: resident_pages * page_size_kb })
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        None
    }
}

/// `GET http://127.0.0.1:<port>/health` with a short deadline, used as a
/// fallback/confirming liveness check alongside the readiness marker.
pub async fn probe_health(port: u16, deadline: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(deadline).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    match client.get(format!("http://127.0.0.1:{port}/health")).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
