//! Tracked scan task records

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task state as reported by the scanning engine.
///
/// Known gvmd states get their own variant; anything else is kept verbatim
/// so that a newer engine never makes the registry unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    New,
    Requested,
    Queued,
    Running,
    StopRequested,
    Stopped,
    Interrupted,
    Done,
    DeleteRequested,
    UltimateDeleteRequested,
    Processing,
    Container,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::New => "New",
            TaskStatus::Requested => "Requested",
            TaskStatus::Queued => "Queued",
            TaskStatus::Running => "Running",
            TaskStatus::StopRequested => "Stop Requested",
            TaskStatus::Stopped => "Stopped",
            TaskStatus::Interrupted => "Interrupted",
            TaskStatus::Done => "Done",
            TaskStatus::DeleteRequested => "Delete Requested",
            TaskStatus::UltimateDeleteRequested => "Ultimate Delete Requested",
            TaskStatus::Processing => "Processing",
            TaskStatus::Container => "Container",
            TaskStatus::Other(s) => s.as_str(),
        }
    }

    /// Whether the engine considers the run complete
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s.trim() {
            "New" => TaskStatus::New,
            "Requested" => TaskStatus::Requested,
            "Queued" => TaskStatus::Queued,
            "Running" => TaskStatus::Running,
            "Stop Requested" => TaskStatus::StopRequested,
            "Stopped" => TaskStatus::Stopped,
            "Interrupted" => TaskStatus::Interrupted,
            "Done" => TaskStatus::Done,
            "Delete Requested" => TaskStatus::DeleteRequested,
            "Ultimate Delete Requested" => TaskStatus::UltimateDeleteRequested,
            "Processing" => TaskStatus::Processing,
            "Container" => TaskStatus::Container,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        TaskStatus::from(s.as_str())
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.as_str().to_string()
    }
}

impl FromStr for TaskStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskStatus::from(s))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked scan.
///
/// The legacy state file used `ip`, `freq` and `last_status`; those keys are
/// still accepted on read. A legacy `last_status` of `Done` already meant the
/// report went out, so such a record loads as notified for `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredTaskRecord")]
pub struct TaskRecord {
    /// Identifier issued by the scanning engine
    pub task_id: String,

    pub scan_name: String,

    /// Timestamp-qualified label, also the artifact file stem
    pub report_name: String,

    /// Resolved addresses scanned
    pub target_spec: Vec<String>,

    /// Recurrence token handed to the engine scheduler
    pub frequency: String,

    pub receiver_email: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_known_status: Option<TaskStatus>,

    /// Status for which an email already went out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified_for_status: Option<TaskStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// On-disk shape of a record, current and legacy keys
#[derive(Deserialize)]
struct StoredTaskRecord {
    task_id: String,
    scan_name: String,
    report_name: String,
    #[serde(alias = "ip", default)]
    target_spec: Vec<String>,
    #[serde(alias = "freq", default)]
    frequency: String,
    #[serde(default)]
    receiver_email: String,
    #[serde(default)]
    last_known_status: Option<TaskStatus>,
    #[serde(default)]
    last_status: Option<TaskStatus>,
    #[serde(default)]
    notified_for_status: Option<TaskStatus>,
    #[serde(default)]
    last_report_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<StoredTaskRecord> for TaskRecord {
    fn from(stored: StoredTaskRecord) -> Self {
        let legacy_done = stored.last_known_status.is_none()
            && stored.notified_for_status.is_none()
            && stored.last_status.as_ref().is_some_and(TaskStatus::is_done);

        Self {
            task_id: stored.task_id,
            scan_name: stored.scan_name,
            report_name: stored.report_name,
            target_spec: stored.target_spec,
            frequency: stored.frequency,
            receiver_email: stored.receiver_email,
            last_known_status: stored.last_known_status.or(stored.last_status),
            notified_for_status: if legacy_done {
                Some(TaskStatus::Done)
            } else {
                stored.notified_for_status
            },
            last_report_id: stored.last_report_id,
            created_at: stored.created_at,
        }
    }
}

impl TaskRecord {
    /// Create a freshly provisioned record with no observed status
    pub fn new(
        task_id: impl Into<String>,
        scan_name: impl Into<String>,
        report_name: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            scan_name: scan_name.into(),
            report_name: report_name.into(),
            target_spec: Vec::new(),
            frequency: String::new(),
            receiver_email: String::new(),
            last_known_status: None,
            notified_for_status: None,
            last_report_id: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_spec = targets;
        self
    }

    pub fn with_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = frequency.into();
        self
    }

    pub fn with_receiver(mut self, email: impl Into<String>) -> Self {
        self.receiver_email = email.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.last_known_status = Some(status);
        self
    }

    pub fn with_notified(mut self, status: TaskStatus) -> Self {
        self.notified_for_status = Some(status);
        self
    }

    /// Whether a completion email has been recorded for the current run
    pub fn is_notified_done(&self) -> bool {
        self.notified_for_status
            .as_ref()
            .map(TaskStatus::is_done)
            .unwrap_or(false)
    }

    /// Display string for the last observed status
    pub fn status_label(&self) -> &str {
        self.last_known_status
            .as_ref()
            .map(TaskStatus::as_str)
            .unwrap_or("-")
    }
}

/// Transition rule: notify iff the engine says Done and Done was not yet notified
pub fn should_notify(current: &TaskStatus, record: &TaskRecord) -> bool {
    current.is_done() && !record.is_notified_done()
}

/// Build the report label for a scan created at `at`
pub fn report_name_for(scan_name: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", scan_name.trim(), at.format("%Y%m%d_%H%M%S"))
}
