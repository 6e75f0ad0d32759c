//! vulnwatch Common - Shared utilities: configuration and logging
//!
//! This crate provides common functionality used by both vulnwatch binaries.

pub mod config;
pub mod logging;

pub use config::Config;
