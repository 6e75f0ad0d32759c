//! vulnwatch Core - Foundation types and error handling
//!
//! This crate provides the core abstractions shared by every vulnwatch crate:
//! - `TaskRecord`: one tracked scan task and its notification guard
//! - `TaskStatus`: the engine's task state vocabulary
//! - `ScanTarget`: host specifications handed to the scanning engine
//! - `Error`: the error taxonomy used across the workspace

pub mod error;
pub mod target;
pub mod task;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use target::{parse_target_list, IpRange, ScanTarget, TargetParseError};
pub use task::{report_name_for, should_notify, TaskRecord, TaskStatus};
