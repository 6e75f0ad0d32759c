//! vulnwatch Console - operator tooling for recurring scans
//!
//! This crate provides:
//! - `ScanProvisioner`: creates target, schedule and task in the engine and
//!   registers the result; deletes in the opposite order
//! - `menu`: the interactive create / delete / list menu

pub mod menu;
pub mod provision;

pub use provision::{ProvisionRequest, ScanProvisioner, TargetSelection};
