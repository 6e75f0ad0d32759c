//! vulnwatch GMP - the scanning engine boundary
//!
//! This crate provides:
//! - `ScanEngine`: the operations vulnwatch needs from a scanning engine
//! - `GmpClient`: a `ScanEngine` speaking GMP XML over the gvmd Unix socket
//! - `schedule`: iCalendar documents for recurring scan schedules
//!
//! Everything above this crate talks to `ScanEngine`, so tests substitute
//! an in-memory engine for gvmd.

pub mod client;
pub mod engine;
pub mod protocol;
pub mod schedule;
pub mod types;

pub use client::GmpClient;
pub use engine::ScanEngine;
pub use types::{GmpConfig, NewTask, TaskInfo};
