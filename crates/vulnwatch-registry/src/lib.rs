//! vulnwatch Registry - durable record of tracked scan tasks
//!
//! This crate provides:
//! - `Registry`: the ordered, `task_id`-keyed set of task records
//! - `RegistryStore`: JSON persistence with atomic replace and
//!   load-mutate-save updates

pub mod registry;
pub mod store;

pub use registry::Registry;
pub use store::RegistryStore;
