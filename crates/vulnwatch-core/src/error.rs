//! Error types for vulnwatch

use thiserror::Error;

/// Result type alias using vulnwatch Error
pub type Result<T> = std::result::Result<T, Error>;

/// vulnwatch error types
#[derive(Error, Debug)]
pub enum Error {
    // === Registry Errors ===
    #[error("Corrupt registry state in {path}: {message}")]
    CorruptState { path: String, message: String },

    #[error("Task not found in registry: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task already registered: {task_id}")]
    DuplicateTask { task_id: String },

    // === Scanning Engine Errors ===
    #[error("Engine query failed ({operation}): {message}")]
    EngineQuery { operation: String, message: String },

    #[error("Engine rejected {command}: {status} {status_text}")]
    Protocol {
        command: String,
        status: String,
        status_text: String,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("No report available yet for task {task_id}")]
    ReportUnavailable { task_id: String },

    // === Delivery Errors ===
    #[error("Report delivery failed: {0}")]
    Delivery(String),

    // === Provisioning Errors ===
    #[error("Task {task_id} was created in the engine but could not be registered: {message}")]
    OrphanedTask { task_id: String, message: String },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Host discovery failed: {0}")]
    Discovery(String),

    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required configuration: {key}")]
    MissingConfig { key: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Build an engine query error for the given operation
    pub fn engine(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::EngineQuery {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error is retryable on a later poll
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EngineQuery { .. }
                | Error::ReportUnavailable { .. }
                | Error::Delivery(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is fatal (should stop the process)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CorruptState { .. }
                | Error::Configuration(_)
                | Error::MissingConfig { .. }
                | Error::InvalidConfig { .. }
        )
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::CorruptState { .. } => "CORRUPT_STATE",
            Error::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Error::DuplicateTask { .. } => "DUPLICATE_TASK",
            Error::EngineQuery { .. } => "ENGINE_QUERY",
            Error::Protocol { .. } => "PROTOCOL_ERROR",
            Error::Authentication(_) => "AUTH_FAILED",
            Error::ReportUnavailable { .. } => "REPORT_UNAVAILABLE",
            Error::Delivery(_) => "DELIVERY_FAILED",
            Error::OrphanedTask { .. } => "ORPHANED_TASK",
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::Discovery(_) => "DISCOVERY_FAILED",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::MissingConfig { .. } => "MISSING_CONFIG",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
        }
    }
}
