//! Engine-facing message types

use std::path::PathBuf;
use std::time::Duration;

use vulnwatch_common::config::EngineConfig;
use vulnwatch_core::TaskStatus;

/// Live state of one engine task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    /// Task ID
    pub task_id: String,
    /// Task name, if the engine returned one
    pub name: Option<String>,
    /// Current run state
    pub status: TaskStatus,
    /// Most recent finished report, if any
    pub report_id: Option<String>,
    /// Progress percentage reported while running
    pub progress: Option<i32>,
}

impl TaskInfo {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            name: None,
            status,
            report_id: None,
            progress: None,
        }
    }

    pub fn with_report(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = Some(report_id.into());
        self
    }
}

/// Parameters for creating a scan task
#[derive(Debug, Clone)]
pub struct NewTask<'a> {
    pub name: &'a str,
    pub config_id: &'a str,
    pub target_id: &'a str,
    pub scanner_id: &'a str,
    pub schedule_id: &'a str,
}

/// Connection settings for a GMP session
#[derive(Debug, Clone)]
pub struct GmpConfig {
    /// Path to the gvmd Unix socket
    pub socket_path: PathBuf,
    /// GMP username
    pub username: String,
    /// GMP password
    pub password: String,
    /// Upper bound for one request/response exchange
    pub request_timeout: Duration,
}

impl Default for GmpConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/gvmd/gvmd.sock"),
            username: String::from("admin"),
            password: String::new(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&EngineConfig> for GmpConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            request_timeout: config.request_timeout(),
        }
    }
}
