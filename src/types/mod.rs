//! Shared data types for the control plane, scheduler and catalog.

pub mod message;
pub mod model;
pub mod node;
pub mod task;

pub use message::{Command, CommandResult, CommandType, HeartbeatMessage, NodeEvent, NodeEventSeverity};
pub use model::{GgufMetadata, Model, ModelStatus, ModelStatusState};
pub use node::{Capabilities, GpuInfo, NodeInfo, NodeRole, NodeStatus, Resources};
pub use task::{Task, TaskStatus};
