//! The scanning engine as seen by vulnwatch

use std::sync::Arc;

use vulnwatch_core::Result;

use crate::types::{NewTask, TaskInfo};

/// Operations vulnwatch needs from a vulnerability scanning engine
#[async_trait::async_trait]
pub trait ScanEngine: Send + Sync {
    /// Create a scan target, returning its id
    async fn create_target(&self, name: &str, hosts: &[String], port_list_id: &str)
        -> Result<String>;

    /// Create a recurrence schedule from an iCalendar document
    async fn create_schedule(&self, name: &str, icalendar: &str, timezone: &str)
        -> Result<String>;

    /// Create a scan task bound to a target and schedule
    async fn create_task(&self, task: &NewTask<'_>) -> Result<String>;

    /// Query the live state of a task
    async fn get_task(&self, task_id: &str) -> Result<TaskInfo>;

    /// Render a report and return the decoded document bytes
    async fn get_report(&self, report_id: &str, format_id: &str, filter: &str) -> Result<Vec<u8>>;

    /// Delete a task
    async fn delete_task(&self, task_id: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: ScanEngine + ?Sized> ScanEngine for Arc<T> {
    async fn create_target(
        &self,
        name: &str,
        hosts: &[String],
        port_list_id: &str,
    ) -> Result<String> {
        (**self).create_target(name, hosts, port_list_id).await
    }

    async fn create_schedule(
        &self,
        name: &str,
        icalendar: &str,
        timezone: &str,
    ) -> Result<String> {
        (**self).create_schedule(name, icalendar, timezone).await
    }

    async fn create_task(&self, task: &NewTask<'_>) -> Result<String> {
        (**self).create_task(task).await
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        (**self).get_task(task_id).await
    }

    async fn get_report(&self, report_id: &str, format_id: &str, filter: &str) -> Result<Vec<u8>> {
        (**self).get_report(report_id, format_id, filter).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        (**self).delete_task(task_id).await
    }
}
