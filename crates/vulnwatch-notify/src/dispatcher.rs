//! Report dispatcher - fetch a finished report, store it, mail it

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use vulnwatch_common::config::{MailConfig, ReportConfig};
use vulnwatch_core::{Error, Result};
use vulnwatch_gmp::ScanEngine;

use crate::mailer::{content_type_for, MailTransport, OutgoingMail};

/// Turns a completed task into a delivered email
pub struct ReportDispatcher {
    engine: Arc<dyn ScanEngine>,
    mailer: Arc<dyn MailTransport>,
    report: ReportConfig,
    from: String,
    body: String,
}

impl ReportDispatcher {
    pub fn new(
        engine: Arc<dyn ScanEngine>,
        mailer: Arc<dyn MailTransport>,
        report: ReportConfig,
        mail: &MailConfig,
    ) -> Self {
        Self {
            engine,
            mailer,
            report,
            from: mail.from.clone(),
            body: mail.body.clone(),
        }
    }

    /// Fetch the rendered report of a task's most recent run
    pub async fn fetch_report(&self, task_id: &str) -> Result<Vec<u8>> {
        let info = self.engine.get_task(task_id).await?;
        let report_id = info.report_id.ok_or_else(|| Error::ReportUnavailable {
            task_id: task_id.to_string(),
        })?;

        debug!("Fetching report {} for task {}", report_id, task_id);
        let bytes = self
            .engine
            .get_report(&report_id, &self.report.format_id, &self.report.filter)
            .await?;

        if bytes.is_empty() {
            return Err(Error::ReportUnavailable {
                task_id: task_id.to_string(),
            });
        }
        Ok(bytes)
    }

    /// Where the artifact for `report_name` is stored
    pub fn artifact_path(&self, report_name: &str) -> PathBuf {
        self.report.output_dir.join(self.artifact_file_name(report_name))
    }

    fn artifact_file_name(&self, report_name: &str) -> String {
        format!("{}.{}", sanitize_file_stem(report_name), self.report.extension)
    }

    /// Write the artifact atomically, replacing any previous one
    pub fn persist_artifact(&self, bytes: &[u8], report_name: &str) -> Result<PathBuf> {
        let dir = &self.report.output_dir;
        std::fs::create_dir_all(dir)?;

        let path = self.artifact_path(report_name);
        write_atomic(dir, &path, bytes)?;
        info!("Report artifact written to {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Mail the stored artifact for `report_name` to `receiver_email`
    pub async fn send(&self, report_name: &str, receiver_email: &str) -> Result<()> {
        let path = self.artifact_path(report_name);
        let attachment = tokio::fs::read(&path).await?;

        let mail = OutgoingMail {
            from: self.from.clone(),
            to: receiver_email.trim().to_string(),
            subject: format!("Report: {}", report_name),
            body: self.body.clone(),
            attachment,
            attachment_name: self.artifact_file_name(report_name),
            content_type: content_type_for(&self.report.extension).to_string(),
        };
        self.mailer.send(mail).await
    }

    /// Fetch, persist and send in one step
    pub async fn dispatch(
        &self,
        task_id: &str,
        report_name: &str,
        receiver_email: &str,
    ) -> Result<PathBuf> {
        let bytes = self.fetch_report(task_id).await?;
        let path = self.persist_artifact(&bytes, report_name)?;
        self.send(report_name, receiver_email).await?;
        info!(
            "Report {} for task {} sent to {}",
            report_name, task_id, receiver_email
        );
        Ok(path)
    }
}

/// Make a report name safe to use as a file stem
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "report".to_string()
    } else {
        cleaned.to_string()
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".vulnwatch-report.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
