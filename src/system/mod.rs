//! System resource/capability monitoring.

pub mod health;

pub use health::{HealthCheck, HealthMonitor, HealthStatus, SystemInfo};
