//! Per-node inference process lifecycle (spec §4.1, §4.2).

pub mod launch;
pub mod manager;
pub mod metrics;
pub mod port_allocator;

pub use launch::{split_command_line, synthesize_argv, LoadRequest};
pub use manager::{Process, ProcessManager};
pub use metrics::{probe_health, sample, ProcessMetrics};
pub use port_allocator::{PortAllocator, PortStats};
