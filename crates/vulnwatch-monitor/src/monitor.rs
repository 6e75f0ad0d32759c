//! Status monitor - reconcile tracked tasks against the engine
//!
//! Each iteration loads the registry fresh, asks the engine for every task's
//! state, and mails the report of a task the first time it is seen `Done`.
//! The notification guard (`notified_for_status`) is only written after the
//! dispatcher succeeded, so a failed delivery is retried on the next poll.
//! Seeing any other status clears the guard again, arming it for the next
//! run of the recurring schedule.
//!
//! Changes are written back per record through `RegistryStore::update`, which
//! re-reads the file first. Records the console added or removed while the
//! iteration was running are left as the console wrote them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vulnwatch_core::{should_notify, Error, Result, TaskRecord, TaskStatus};
use vulnwatch_gmp::{ScanEngine, TaskInfo};
use vulnwatch_notify::ReportDispatcher;
use vulnwatch_registry::RegistryStore;

/// Outcome counts for one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    pub checked: usize,
    pub notified: usize,
    pub query_failures: usize,
    pub delivery_failures: usize,
    pub persist_failures: usize,
}

impl IterationReport {
    pub fn has_failures(&self) -> bool {
        self.query_failures + self.delivery_failures + self.persist_failures > 0
    }
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} notified={} query_failures={} delivery_failures={} persist_failures={}",
            self.checked,
            self.notified,
            self.query_failures,
            self.delivery_failures,
            self.persist_failures
        )
    }
}

/// Fields of a record the monitor owns
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    last_known_status: Option<TaskStatus>,
    notified_for_status: Option<TaskStatus>,
    last_report_id: Option<String>,
}

impl Observation {
    fn of(record: &TaskRecord) -> Self {
        Self {
            last_known_status: record.last_known_status.clone(),
            notified_for_status: record.notified_for_status.clone(),
            last_report_id: record.last_report_id.clone(),
        }
    }

    fn apply(self, record: &mut TaskRecord) {
        record.last_known_status = self.last_known_status;
        record.notified_for_status = self.notified_for_status;
        record.last_report_id = self.last_report_id;
    }
}

/// Polls the engine and fires completion notifications
pub struct StatusMonitor {
    store: RegistryStore,
    engine: Arc<dyn ScanEngine>,
    dispatcher: ReportDispatcher,
    poll_interval: Duration,
}

impl StatusMonitor {
    pub fn new(
        store: RegistryStore,
        engine: Arc<dyn ScanEngine>,
        dispatcher: ReportDispatcher,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            dispatcher,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run until `shutdown` is cancelled
    ///
    /// Cancellation is observed between iterations, so an iteration that has
    /// started always finishes and persists. Only fatal errors (a corrupt
    /// state file) end the loop early.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Status monitor started: state file {}, poll interval {:?}",
            self.store.path().display(),
            self.poll_interval
        );

        loop {
            match self.reconcile_once().await {
                Ok(report) if report.has_failures() => warn!("Reconciliation finished: {}", report),
                Ok(report) => info!("Reconciliation finished: {}", report),
                Err(e) if e.is_fatal() => {
                    error!("Stopping monitor: {}", e);
                    return Err(e);
                }
                Err(e) => error!("Reconciliation failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Status monitor stopped");
        Ok(())
    }

    /// One pass over every tracked task
    pub async fn reconcile_once(&self) -> Result<IterationReport> {
        let registry = self.store.load()?;
        let mut report = IterationReport::default();
        debug!("Reconciling {} task(s)", registry.len());

        for record in registry.iter() {
            report.checked += 1;

            let info = match self.engine.get_task(&record.task_id).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Status query for task {} failed: {}", record.task_id, e);
                    report.query_failures += 1;
                    continue;
                }
            };

            let next = self.observe(record, &info, &mut report).await;
            if next == Observation::of(record) {
                continue;
            }

            let task_id = record.task_id.as_str();
            let written = self.store.update(|registry| {
                Ok(match registry.find_mut(task_id) {
                    Some(current) => {
                        next.apply(current);
                        true
                    }
                    None => false,
                })
            });

            match written {
                Ok(true) => debug!("Task {} now {}", task_id, info.status),
                Ok(false) => info!("Task {} was removed while polling; leaving it removed", task_id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to persist state for task {}: {}", task_id, e);
                    report.persist_failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Decide a record's new monitor-owned fields, dispatching if due
    async fn observe(
        &self,
        record: &TaskRecord,
        info: &TaskInfo,
        report: &mut IterationReport,
    ) -> Observation {
        let mut next = Observation::of(record);
        next.last_known_status = Some(info.status.clone());
        if info.report_id.is_some() {
            next.last_report_id = info.report_id.clone();
        }

        if should_notify(&info.status, record) {
            info!(
                "Task {} ({}) completed; sending report {} to {}",
                record.task_id, record.scan_name, record.report_name, record.receiver_email
            );
            match self
                .dispatcher
                .dispatch(&record.task_id, &record.report_name, &record.receiver_email)
                .await
            {
                Ok(_) => {
                    next.notified_for_status = Some(TaskStatus::Done);
                    report.notified += 1;
                }
                Err(e) => {
                    log_dispatch_failure(&record.task_id, &e);
                    report.delivery_failures += 1;
                }
            }
        } else if !info.status.is_done() && next.notified_for_status.is_some() {
            debug!(
                "Task {} is {} again; re-arming notification",
                record.task_id, info.status
            );
            next.notified_for_status = None;
        }

        next
    }
}

fn log_dispatch_failure(task_id: &str, e: &Error) {
    if e.is_retryable() {
        warn!("Report for task {} not delivered, will retry: {}", task_id, e);
    } else {
        error!("Report for task {} not delivered: {}", task_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vulnwatch_common::config::{MailConfig, ReportConfig};
    use vulnwatch_gmp::NewTask;
    use vulnwatch_notify::{MailTransport, OutgoingMail};
    use vulnwatch_registry::Registry;

    /// Engine whose task states the test scripts between polls
    #[derive(Default)]
    struct ScriptedEngine {
        tasks: Mutex<HashMap<String, Result<TaskInfo>>>,
        queries: AtomicUsize,
        /// Hook run on every status query, after the answer is chosen
        on_query: Mutex<Option<Box<dyn Fn(&str) + Send>>>,
    }

    impl ScriptedEngine {
        fn set(&self, task_id: &str, status: TaskStatus) {
            let mut info = TaskInfo::new(task_id, status.clone());
            if status.is_done() {
                info = info.with_report(format!("R-{}", task_id));
            }
            self.tasks.lock().unwrap().insert(task_id.into(), Ok(info));
        }

        fn fail(&self, task_id: &str) {
            self.tasks.lock().unwrap().insert(
                task_id.into(),
                Err(Error::engine("get_tasks", "connection reset")),
            );
        }
    }

    #[async_trait::async_trait]
    impl ScanEngine for ScriptedEngine {
        async fn create_target(&self, _: &str, _: &[String], _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn create_schedule(&self, _: &str, _: &str, _: &str) -> Result<String> {
            unimplemented!()
        }
        async fn create_task(&self, _: &NewTask<'_>) -> Result<String> {
            unimplemented!()
        }
        async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let answer = match self.tasks.lock().unwrap().get(task_id) {
                Some(Ok(info)) => Ok(info.clone()),
                Some(Err(e)) => Err(Error::engine("get_tasks", e.to_string())),
                None => Err(Error::engine("get_tasks", "unknown task")),
            };
            if let Some(hook) = self.on_query.lock().unwrap().as_ref() {
                hook(task_id);
            }
            answer
        }
        async fn get_report(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
            Ok(b"%PDF-1.4 report".to_vec())
        }
        async fn delete_task(&self, _: &str) -> Result<()> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct FlakyMailer {
        sent: Mutex<Vec<OutgoingMail>>,
        failures_left: AtomicUsize,
    }

    impl FlakyMailer {
        fn failing(times: usize) -> Self {
            let mailer = Self::default();
            mailer.failures_left.store(times, Ordering::SeqCst);
            mailer
        }

        fn subjects(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.subject.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl MailTransport for FlakyMailer {
        async fn send(&self, mail: OutgoingMail) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Delivery("451 try again later".into()));
            }
            self.sent.lock().unwrap().push(mail);
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        store: RegistryStore,
        engine: Arc<ScriptedEngine>,
        mailer: Arc<FlakyMailer>,
        monitor: StatusMonitor,
    }

    fn harness(records: Vec<TaskRecord>, mailer: FlakyMailer) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("scan_state.json"));
        store
            .save(&Registry::from_records(records).unwrap())
            .unwrap();

        let engine = Arc::new(ScriptedEngine::default());
        let mailer = Arc::new(mailer);
        let report = ReportConfig {
            output_dir: dir.path().join("reports"),
            ..ReportConfig::default()
        };
        let mail = MailConfig {
            from: "scanner@example.com".into(),
            ..MailConfig::default()
        };
        let dispatcher = ReportDispatcher::new(engine.clone(), mailer.clone(), report, &mail);
        let monitor = StatusMonitor::new(
            RegistryStore::new(store.path()),
            engine.clone(),
            dispatcher,
            Duration::from_secs(30),
        );

        Harness {
            _dir: dir,
            store,
            engine,
            mailer,
            monitor,
        }
    }

    fn record(task_id: &str) -> TaskRecord {
        TaskRecord::new(task_id, "weekly", format!("weekly_{}", task_id))
            .with_targets(vec!["10.0.0.5".into()])
            .with_frequency("WEEKLY")
            .with_receiver("ops@example.com")
    }

    fn stored(h: &Harness, task_id: &str) -> TaskRecord {
        h.store.load().unwrap().find(task_id).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_already_notified_done_sends_nothing() {
        let h = harness(
            vec![record("T1")
                .with_status(TaskStatus::Done)
                .with_notified(TaskStatus::Done)],
            FlakyMailer::default(),
        );
        h.engine.set("T1", TaskStatus::Done);

        for _ in 0..5 {
            let report = h.monitor.reconcile_once().await.unwrap();
            assert_eq!(report.notified, 0);
        }
        assert!(h.mailer.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_running_then_done_fires_once() {
        let h = harness(vec![record("T1")], FlakyMailer::default());

        h.engine.set("T1", TaskStatus::Running);
        h.monitor.reconcile_once().await.unwrap();
        assert_eq!(stored(&h, "T1").last_known_status, Some(TaskStatus::Running));
        assert!(h.mailer.subjects().is_empty());

        h.engine.set("T1", TaskStatus::Done);
        let report = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(report.notified, 1);
        h.monitor.reconcile_once().await.unwrap();

        assert_eq!(h.mailer.subjects(), vec!["Report: weekly_T1".to_string()]);
        let rec = stored(&h, "T1");
        assert_eq!(rec.notified_for_status, Some(TaskStatus::Done));
        assert_eq!(rec.last_report_id.as_deref(), Some("R-T1"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_retried_next_poll() {
        let h = harness(vec![record("T1")], FlakyMailer::failing(1));
        h.engine.set("T1", TaskStatus::Done);

        let first = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(first.delivery_failures, 1);
        let rec = stored(&h, "T1");
        assert_eq!(rec.last_known_status, Some(TaskStatus::Done));
        assert_eq!(rec.notified_for_status, None);

        let second = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(second.notified, 1);
        assert_eq!(h.mailer.subjects().len(), 1);
        assert_eq!(stored(&h, "T1").notified_for_status, Some(TaskStatus::Done));
    }

    #[tokio::test]
    async fn test_query_failure_does_not_block_other_tasks() {
        let h = harness(
            vec![record("A").with_status(TaskStatus::Running), record("B")],
            FlakyMailer::default(),
        );
        h.engine.fail("A");
        h.engine.set("B", TaskStatus::Done);

        let report = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.query_failures, 1);
        assert_eq!(report.notified, 1);

        assert_eq!(stored(&h, "A").last_known_status, Some(TaskStatus::Running));
        assert_eq!(stored(&h, "B").notified_for_status, Some(TaskStatus::Done));
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_block_other_tasks() {
        let h = harness(vec![record("A"), record("B")], FlakyMailer::failing(1));
        h.engine.set("A", TaskStatus::Done);
        h.engine.set("B", TaskStatus::Done);

        let report = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.delivery_failures, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(h.mailer.subjects(), vec!["Report: weekly_B".to_string()]);

        assert_eq!(stored(&h, "A").notified_for_status, None);
        assert_eq!(stored(&h, "B").notified_for_status, Some(TaskStatus::Done));

        h.monitor.reconcile_once().await.unwrap();
        assert_eq!(h.mailer.subjects().len(), 2);
        assert_eq!(stored(&h, "A").notified_for_status, Some(TaskStatus::Done));
    }

    #[tokio::test]
    async fn test_done_without_report_is_retried_until_report_appears() {
        let h = harness(vec![record("T1").with_status(TaskStatus::Running)], FlakyMailer::default());
        h.engine
            .tasks
            .lock()
            .unwrap()
            .insert("T1".into(), Ok(TaskInfo::new("T1", TaskStatus::Done)));

        let first = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(first.delivery_failures, 1);
        assert!(h.mailer.subjects().is_empty());
        let rec = stored(&h, "T1");
        assert_eq!(rec.last_known_status, Some(TaskStatus::Done));
        assert_eq!(rec.notified_for_status, None);

        h.engine.set("T1", TaskStatus::Done);
        let second = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(second.notified, 1);
        assert_eq!(h.mailer.subjects(), vec!["Report: weekly_T1".to_string()]);
        assert_eq!(stored(&h, "T1").notified_for_status, Some(TaskStatus::Done));
    }

    #[tokio::test]
    async fn test_legacy_done_record_is_not_mailed_again() {
        let h = harness(vec![], FlakyMailer::default());
        std::fs::write(
            h.store.path(),
            r#"{"tasks": [{"task_id": "T1", "report_name": "lab_20231005_093000",
                "ip": ["192.168.0.10"], "scan_name": "lab", "freq": "DAILY",
                "receiver_email": "it@example.com", "last_status": "Done"}]}"#,
        )
        .unwrap();
        h.engine.set("T1", TaskStatus::Done);

        let report = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(report.notified, 0);
        assert!(h.mailer.subjects().is_empty());

        h.engine.set("T1", TaskStatus::Running);
        h.monitor.reconcile_once().await.unwrap();
        h.engine.set("T1", TaskStatus::Done);
        h.monitor.reconcile_once().await.unwrap();

        assert_eq!(
            h.mailer.subjects(),
            vec!["Report: lab_20231005_093000".to_string()]
        );
    }

    #[tokio::test]
    async fn test_end_to_end_completion() {
        let h = harness(
            vec![TaskRecord::new("T1", "web", "web_20240301_090000")
                .with_targets(vec!["web01.example.com".into()])
                .with_frequency("DAILY")
                .with_receiver("ops@example.com")
                .with_status(TaskStatus::Running)],
            FlakyMailer::default(),
        );
        h.engine.tasks.lock().unwrap().insert(
            "T1".into(),
            Ok(TaskInfo::new("T1", TaskStatus::Done).with_report("R1")),
        );

        h.monitor.reconcile_once().await.unwrap();

        let rec = stored(&h, "T1");
        assert_eq!(rec.last_known_status, Some(TaskStatus::Done));
        assert_eq!(rec.notified_for_status, Some(TaskStatus::Done));
        assert_eq!(rec.last_report_id.as_deref(), Some("R1"));

        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("web_20240301_090000"));
        assert_eq!(sent[0].to, "ops@example.com");
    }

    #[tokio::test]
    async fn test_recurring_run_notifies_again() {
        let h = harness(
            vec![record("T1")
                .with_status(TaskStatus::Done)
                .with_notified(TaskStatus::Done)],
            FlakyMailer::default(),
        );

        h.engine.set("T1", TaskStatus::Done);
        h.monitor.reconcile_once().await.unwrap();
        h.engine.set("T1", TaskStatus::Running);
        h.monitor.reconcile_once().await.unwrap();
        assert_eq!(stored(&h, "T1").notified_for_status, None);

        h.engine.set("T1", TaskStatus::Done);
        h.monitor.reconcile_once().await.unwrap();
        h.monitor.reconcile_once().await.unwrap();

        assert_eq!(h.mailer.subjects().len(), 1);

        h.engine.set("T1", TaskStatus::Queued);
        h.monitor.reconcile_once().await.unwrap();
        h.engine.set("T1", TaskStatus::Done);
        h.monitor.reconcile_once().await.unwrap();

        assert_eq!(h.mailer.subjects().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_rewritten() {
        let h = harness(
            vec![record("T1").with_status(TaskStatus::Running)],
            FlakyMailer::default(),
        );
        h.engine.set("T1", TaskStatus::Running);

        // Compact JSON: any rewrite by the store would come back pretty-printed
        let compact = serde_json::to_string(&h.store.load().unwrap()).unwrap();
        std::fs::write(h.store.path(), &compact).unwrap();

        let report = h.monitor.reconcile_once().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(std::fs::read_to_string(h.store.path()).unwrap(), compact);
    }

    #[tokio::test]
    async fn test_console_removal_is_not_undone() {
        let h = harness(vec![record("T1"), record("T2")], FlakyMailer::default());
        h.engine.set("T1", TaskStatus::Running);
        h.engine.set("T2", TaskStatus::Running);

        // The console deletes T1 while the monitor is querying it
        let console = RegistryStore::new(h.store.path());
        *h.engine.on_query.lock().unwrap() = Some(Box::new(move |task_id| {
            if task_id == "T1" {
                console.update(|r| r.remove("T1").map(|_| ())).unwrap();
            }
        }));

        h.monitor.reconcile_once().await.unwrap();

        let registry = h.store.load().unwrap();
        assert!(registry.find("T1").is_none());
        assert_eq!(
            registry.find("T2").unwrap().last_known_status,
            Some(TaskStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_console_addition_is_preserved() {
        let h = harness(vec![record("T1")], FlakyMailer::default());
        h.engine.set("T1", TaskStatus::Running);

        let console = RegistryStore::new(h.store.path());
        *h.engine.on_query.lock().unwrap() = Some(Box::new(move |_| {
            console
                .update(|r| {
                    if r.find("T9").is_none() {
                        r.add(record("T9"))?;
                    }
                    Ok(())
                })
                .unwrap();
        }));

        h.monitor.reconcile_once().await.unwrap();

        let registry = h.store.load().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.find("T1").unwrap().last_known_status,
            Some(TaskStatus::Running)
        );
        assert_eq!(registry.find("T9").unwrap().last_known_status, None);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_fatal() {
        let h = harness(vec![], FlakyMailer::default());
        std::fs::write(h.store.path(), "{ not json").unwrap();

        let err = h.monitor.reconcile_once().await.unwrap_err();
        assert!(matches!(err, Error::CorruptState { .. }));

        let token = CancellationToken::new();
        assert!(h.monitor.run(token).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval_until_cancelled() {
        let h = Arc::new(harness(vec![record("T1")], FlakyMailer::default()));
        h.engine.set("T1", TaskStatus::Running);

        let token = CancellationToken::new();
        let task = {
            let h = h.clone();
            let token = token.clone();
            tokio::spawn(async move { h.monitor.run(token).await })
        };

        // Polls at t=0, 30 and 60
        tokio::time::sleep(Duration::from_secs(65)).await;
        token.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.engine.queries.load(Ordering::SeqCst), 3);
    }
}
