//! Error types for Shepherd
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Error context and chaining
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for Shepherd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // Node / registry errors (2xx)
    NodeNotFound = 200,
    NodeAlreadyRegistered = 201,
    HeartbeatRejected = 202,
    QueueFull = 203,
    CommandForbidden = 204,

    // Process manager errors (3xx)
    ProcessAlreadyRunning = 300,
    ProcessSpawnFailed = 301,
    ProcessStopTimeout = 302,
    PortExhausted = 303,

    // Catalog / GGUF errors (4xx)
    ModelNotFound = 400,
    ModelAlreadyLoaded = 401,
    GgufInvalid = 402,
    GgufTruncated = 403,

    // Scheduler errors (5xx)
    NoSuitableNode = 500,
    TaskTimeout = 501,
    TaskCancelled = 502,

    // IO / transport errors (6xx)
    IoRead = 600,
    IoWrite = 601,
    IoPermission = 602,
    IoNotFound = 603,
    ConnectionFailed = 610,
    ConnectionTimeout = 611,
    ConnectionLost = 612,
    ProtocolMalformed = 620,
    AuthenticationFailed = 621,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 901,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // Node/registry errors
            300..=399 => 30, // Process manager errors
            400..=499 => 40, // Catalog errors
            500..=599 => 50, // Scheduler errors
            600..=699 => 60, // IO/transport errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The seven abstract error kinds of the control plane design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    Conflict,
    Exhausted,
    Transient,
    Fatal,
    Timeout,
}

/// Main error type for Shepherd
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // Node / Registry Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Unknown node: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Node {node_id} already registered with a different address")]
    NodeAlreadyRegistered { node_id: String },

    #[error("Heartbeat rejected for {node_id}: sequence {sequence} is not greater than last accepted")]
    HeartbeatRejected { node_id: String, sequence: i64 },

    #[error("Command queue full for node {node_id} (max {max_size})")]
    QueueFull { node_id: String, max_size: usize },

    #[error("Command {command_type} is not permitted by this node's configuration")]
    CommandForbidden { command_type: String },

    // ─────────────────────────────────────────────────────────────
    // Process Manager Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Process for model {model_id} is already running or loading")]
    ProcessAlreadyRunning { model_id: String },

    #[error("Failed to spawn inference process for {model_id}: {message}")]
    ProcessSpawnFailed { model_id: String, message: String },

    #[error("Process for {model_id} did not stop within the grace period")]
    ProcessStopTimeout { model_id: String },

    #[error("Port allocator exhausted: no free port in [{base}, {max}]")]
    PortExhausted { base: u16, max: u16 },

    // ─────────────────────────────────────────────────────────────
    // Catalog / GGUF Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Model not found: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("Model {model_id} is already loaded")]
    ModelAlreadyLoaded { model_id: String },

    #[error("Invalid GGUF file {path}: {message}")]
    GgufInvalid { path: PathBuf, message: String },

    #[error("GGUF file {path} is smaller than its declared header")]
    GgufTruncated { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Scheduler Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No suitable node found for task {task_id}")]
    NoSuitableNode { task_id: String },

    #[error("Task {task_id} timed out after {timeout_ms}ms")]
    TaskTimeout { task_id: String, timeout_ms: u64 },

    #[error("Task {task_id} was cancelled")]
    TaskCancelled { task_id: String },

    // ─────────────────────────────────────────────────────────────
    // IO / Transport Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Connection to {url} timed out after {timeout_secs}s")]
    ConnectionTimeout { url: String, timeout_secs: u64 },

    #[error("Lost connection to coordinator: {message}")]
    ConnectionLost { message: String },

    #[error("Malformed control-plane message: {message}")]
    ProtocolMalformed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::NodeNotFound { .. } => ErrorCode::NodeNotFound,
            Error::NodeAlreadyRegistered { .. } => ErrorCode::NodeAlreadyRegistered,
            Error::HeartbeatRejected { .. } => ErrorCode::HeartbeatRejected,
            Error::QueueFull { .. } => ErrorCode::QueueFull,
            Error::CommandForbidden { .. } => ErrorCode::CommandForbidden,

            Error::ProcessAlreadyRunning { .. } => ErrorCode::ProcessAlreadyRunning,
            Error::ProcessSpawnFailed { .. } => ErrorCode::ProcessSpawnFailed,
            Error::ProcessStopTimeout { .. } => ErrorCode::ProcessStopTimeout,
            Error::PortExhausted { .. } => ErrorCode::PortExhausted,

            Error::ModelNotFound { .. } => ErrorCode::ModelNotFound,
            Error::ModelAlreadyLoaded { .. } => ErrorCode::ModelAlreadyLoaded,
            Error::GgufInvalid { .. } => ErrorCode::GgufInvalid,
            Error::GgufTruncated { .. } => ErrorCode::GgufTruncated,

            Error::NoSuitableNode { .. } => ErrorCode::NoSuitableNode,
            Error::TaskTimeout { .. } => ErrorCode::TaskTimeout,
            Error::TaskCancelled { .. } => ErrorCode::TaskCancelled,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::WebSocket(_) => ErrorCode::ConnectionFailed,
            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Error::ProtocolMalformed { .. } => ErrorCode::ProtocolMalformed,
            Error::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,

            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Map onto the abstract error kind (spec §7)
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigValidation { .. } | Error::Config(_) => ErrorKind::InvalidRequest,
            Error::NodeNotFound { .. } | Error::ModelNotFound { .. } => ErrorKind::NotFound,
            Error::NodeAlreadyRegistered { .. }
            | Error::ProcessAlreadyRunning { .. }
            | Error::ModelAlreadyLoaded { .. } => ErrorKind::Conflict,
            Error::QueueFull { .. } | Error::PortExhausted { .. } | Error::NoSuitableNode { .. } => {
                ErrorKind::Exhausted
            }
            Error::ConnectionFailed { .. }
            | Error::ConnectionTimeout { .. }
            | Error::ConnectionLost { .. }
            | Error::Io(_)
            | Error::IoRead { .. }
            | Error::IoWrite { .. } => ErrorKind::Transient,
            Error::ProcessSpawnFailed { .. }
            | Error::GgufInvalid { .. }
            | Error::GgufTruncated { .. }
            | Error::AuthenticationFailed { .. }
            | Error::ConfigNotFound { .. }
            | Error::ConfigParse { .. }
            | Error::Internal(_) => ErrorKind::Fatal,
            Error::TaskTimeout { .. } | Error::ProcessStopTimeout { .. } => ErrorKind::Timeout,
            Error::TaskCancelled { .. } => ErrorKind::Conflict,
            Error::HeartbeatRejected { .. } => ErrorKind::InvalidRequest,
            Error::ProtocolMalformed { .. } => ErrorKind::InvalidRequest,
            Error::CommandForbidden { .. } => ErrorKind::InvalidRequest,
            Error::Toml(_) => ErrorKind::Fatal,
            Error::WebSocket(_) => ErrorKind::Transient,
            Error::NotSupported(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Check if the error is fatal (node should stop what it's doing)
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => {
                Some("Run 'shepherd config init' to create a default configuration file.")
            }
            Error::ConfigParse { .. } => {
                Some("Check your configuration file syntax. Run 'shepherd config validate' to see details.")
            }
            Error::ConfigValidation { .. } => {
                Some("Review the configuration file and fix the invalid values.")
            }
            Error::ConnectionFailed { .. } => {
                Some("Check your network connection and verify the master address is correct.")
            }
            Error::ConnectionTimeout { .. } => {
                Some("The coordinator may be unreachable. Check firewall rules and the configured port.")
            }
            Error::ConnectionLost { .. } => {
                Some("Connection was interrupted; the node will re-register automatically.")
            }
            Error::ModelNotFound { .. } => {
                Some("Run 'shepherd scan' to refresh the model catalog.")
            }
            Error::ModelAlreadyLoaded { .. } => Some("Unload the model before loading it again."),
            Error::PortExhausted { .. } => {
                Some("Widen the configured port range or stop unused inference processes.")
            }
            Error::NoSuitableNode { .. } => {
                Some("No online worker currently satisfies the task's resource requirements.")
            }
            Error::CommandForbidden { .. } => {
                Some("Add the command type to executor.allowedCommands (or enable allowRemoteStop) to permit it.")
            }
            Error::GgufInvalid { .. } | Error::GgufTruncated { .. } => {
                Some("The model file may be corrupted or incomplete; re-download it.")
            }
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", code.as_str(), self);

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into(), source: None }
    }

    pub fn config_parse(message: impl Into<String>) -> Self {
        Error::ConfigParse { message: message.into(), source: None }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation { message: message.into(), field: None }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation { message: message.into(), field: Some(field.into()) }
    }

    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Error::NodeNotFound { node_id: node_id.into() }
    }

    pub fn command_forbidden(command_type: impl Into<String>) -> Self {
        Error::CommandForbidden { command_type: command_type.into() }
    }

    pub fn model_not_found(model_id: impl Into<String>) -> Self {
        Error::ModelNotFound { model_id: model_id.into() }
    }

    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed { url: url.into(), message: message.into() }
    }

    pub fn connection_timeout(url: impl Into<String>, timeout_secs: u64) -> Self {
        Error::ConnectionTimeout { url: url.into(), timeout_secs }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::ConnectionFailed.as_str(), "E610");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), 10);
        assert_eq!(ErrorCode::NodeNotFound.exit_code(), 20);
        assert_eq!(ErrorCode::ProcessAlreadyRunning.exit_code(), 30);
        assert_eq!(ErrorCode::ModelNotFound.exit_code(), 40);
        assert_eq!(ErrorCode::NoSuitableNode.exit_code(), 50);
        assert_eq!(ErrorCode::IoRead.exit_code(), 60);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::node_not_found("n1").kind(), ErrorKind::NotFound);
        assert_eq!(Error::PortExhausted { base: 1, max: 2 }.kind(), ErrorKind::Exhausted);
        assert_eq!(
            Error::connection_failed("ws://x", "refused").kind(),
            ErrorKind::Transient
        );
        assert!(Error::connection_failed("ws://x", "refused").is_retryable());
        assert!(Error::config_not_found("/x").is_fatal());
    }

    #[test]
    fn test_format_for_terminal_and_log() {
        let err = Error::config_not_found("/test/config.toml");
        let terminal = err.format_for_terminal();
        assert!(terminal.contains("E100"));
        assert!(terminal.contains("\x1b[31m"));
        assert!(terminal.contains("Hint"));

        let log = err.format_for_log();
        assert!(log.contains("[E100]"));
        assert!(!log.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }

    #[test]
    fn test_command_forbidden_is_permanent() {
        let err = Error::command_forbidden("StopProcess");
        assert_eq!(err.code(), ErrorCode::CommandForbidden);
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(!err.is_retryable());
    }
}
