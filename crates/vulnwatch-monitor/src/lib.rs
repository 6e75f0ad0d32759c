//! vulnwatch Monitor - the notification daemon
//!
//! Polls the scanning engine for every tracked task and mails each finished
//! report to its recipient exactly once per completed run.

pub mod monitor;

pub use monitor::{IterationReport, StatusMonitor};
