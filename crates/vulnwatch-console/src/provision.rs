//! Scan provisioning: engine objects first, registry record last
//!
//! Creating a scan makes three engine objects (target, schedule, task) and
//! then registers the task locally. There is no rollback across the engine
//! boundary: if registration fails after the task exists, the task id is
//! reported as orphaned so the operator can clean it up.

use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{info, warn};

use vulnwatch_common::config::EngineConfig;
use vulnwatch_core::{parse_target_list, report_name_for, Error, Result, TaskRecord};
use vulnwatch_gmp::schedule::{build_icalendar, first_run, normalize_frequency};
use vulnwatch_gmp::{NewTask, ScanEngine};
use vulnwatch_network::{DiscoveredHost, HostDiscoverer};
use vulnwatch_notify::validate_recipient;
use vulnwatch_registry::RegistryStore;

/// Where a new scan's hosts come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    /// Addresses or hostnames entered by the operator
    Manual(Vec<String>),
    /// Hosts the operator picked from a discovery run
    Discovered(Vec<DiscoveredHost>),
    /// Every host discovery finds in a network range
    DiscoverAll(String),
}

/// Everything the operator supplies for a new scan
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub scan_name: String,
    pub targets: TargetSelection,
    pub frequency: String,
    pub receiver_email: String,
}

/// Creates and deletes scans in the engine and the registry
pub struct ScanProvisioner {
    engine: Arc<dyn ScanEngine>,
    discoverer: Arc<dyn HostDiscoverer>,
    store: RegistryStore,
    settings: EngineConfig,
}

impl ScanProvisioner {
    pub fn new(
        engine: Arc<dyn ScanEngine>,
        discoverer: Arc<dyn HostDiscoverer>,
        store: RegistryStore,
        settings: EngineConfig,
    ) -> Self {
        Self {
            engine,
            discoverer,
            store,
            settings,
        }
    }

    /// Run host discovery over `network_range`
    pub async fn discover(&self, network_range: &str) -> Result<Vec<DiscoveredHost>> {
        self.discoverer.discover(network_range).await
    }

    /// All tracked scans, in registry order
    pub fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.store.load()?.into_records())
    }

    /// Provision a recurring scan and start tracking it
    pub async fn create(&self, request: ProvisionRequest) -> Result<TaskRecord> {
        let scan_name = request.scan_name.trim().to_string();
        if scan_name.is_empty() {
            return Err(Error::InvalidInput {
                field: "scan_name".into(),
                message: "must not be empty".into(),
            });
        }
        let frequency = normalize_frequency(&request.frequency)?;
        validate_recipient(&request.receiver_email)?;
        let receiver_email = request.receiver_email.trim().to_string();

        let hosts = self.resolve_targets(request.targets).await?;

        let target_id = self
            .engine
            .create_target(&scan_name, &hosts, &self.settings.port_list_id)
            .await?;

        let now = Utc::now();
        let start = first_run(now, self.settings.schedule_start_delay_minutes);
        let schedule_id = self
            .engine
            .create_schedule(
                &format!("{}_{}", scan_name, frequency),
                &build_icalendar(&frequency, start, now),
                &self.settings.timezone,
            )
            .await?;

        let task_id = self
            .engine
            .create_task(&NewTask {
                name: &scan_name,
                config_id: &self.settings.scan_config_id,
                target_id: &target_id,
                scanner_id: &self.settings.scanner_id,
                schedule_id: &schedule_id,
            })
            .await?;

        let record = TaskRecord::new(&task_id, &scan_name, report_name_for(&scan_name, Local::now()))
            .with_targets(hosts)
            .with_frequency(frequency)
            .with_receiver(receiver_email);

        if let Err(e) = self.store.update(|registry| registry.add(record.clone())) {
            warn!(
                "Task {} exists in the engine but could not be registered: {}",
                task_id, e
            );
            return Err(Error::OrphanedTask {
                task_id,
                message: e.to_string(),
            });
        }

        info!(
            "Scan '{}' provisioned: task {}, first run at {}",
            scan_name, task_id, start
        );
        Ok(record)
    }

    /// Delete a scan from the engine, then stop tracking it
    pub async fn delete(&self, task_id: &str) -> Result<TaskRecord> {
        if self.store.load()?.find(task_id).is_none() {
            return Err(Error::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }

        self.engine.delete_task(task_id).await?;
        let removed = self.store.update(|registry| registry.remove(task_id))?;
        info!("Scan '{}' ({}) deleted", removed.scan_name, task_id);
        Ok(removed)
    }

    async fn resolve_targets(&self, selection: TargetSelection) -> Result<Vec<String>> {
        let hosts: Vec<String> = match selection {
            TargetSelection::Manual(entries) => parse_target_list(&entries.join(" "))?
                .iter()
                .map(ToString::to_string)
                .collect(),
            TargetSelection::Discovered(hosts) => {
                hosts.iter().map(|h| h.address.to_string()).collect()
            }
            TargetSelection::DiscoverAll(range) => {
                let found = self.discover(&range).await?;
                if found.is_empty() {
                    return Err(Error::Discovery(format!("no hosts found in {}", range.trim())));
                }
                found.iter().map(|h| h.address.to_string()).collect()
            }
        };

        if hosts.is_empty() {
            return Err(Error::InvalidInput {
                field: "targets".into(),
                message: "at least one host is required".into(),
            });
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vulnwatch_core::TaskStatus;
    use vulnwatch_gmp::TaskInfo;

    /// Records every engine call as a short string
    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingEngine {
        fn failing_on(call: &'static str) -> Self {
            Self {
                fail_on: Some(call),
                ..Default::default()
            }
        }

        fn record(&self, call: &'static str, detail: String) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{} {}", call, detail));
            if self.fail_on == Some(call) {
                return Err(Error::engine(call, "gvmd said no"));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ScanEngine for RecordingEngine {
        async fn create_target(
            &self,
            name: &str,
            hosts: &[String],
            port_list_id: &str,
        ) -> Result<String> {
            self.record(
                "create_target",
                format!("{} [{}] {}", name, hosts.join(","), port_list_id),
            )?;
            Ok("target-1".into())
        }

        async fn create_schedule(
            &self,
            name: &str,
            icalendar: &str,
            timezone: &str,
        ) -> Result<String> {
            assert!(icalendar.contains("RRULE:FREQ="));
            self.record("create_schedule", format!("{} {}", name, timezone))?;
            Ok("schedule-1".into())
        }

        async fn create_task(&self, task: &NewTask<'_>) -> Result<String> {
            self.record(
                "create_task",
                format!(
                    "{} {} {} {}",
                    task.name, task.target_id, task.schedule_id, task.config_id
                ),
            )?;
            Ok("task-1".into())
        }

        async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
            Ok(TaskInfo::new(task_id, TaskStatus::New))
        }

        async fn get_report(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn delete_task(&self, task_id: &str) -> Result<()> {
            self.record("delete_task", task_id.to_string())
        }
    }

    struct FixedDiscoverer(Vec<DiscoveredHost>);

    #[async_trait::async_trait]
    impl HostDiscoverer for FixedDiscoverer {
        async fn discover(&self, _network_range: &str) -> Result<Vec<DiscoveredHost>> {
            Ok(self.0.clone())
        }
    }

    fn host(last: u8, name: &str) -> DiscoveredHost {
        DiscoveredHost::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            Some(name.to_string()),
        )
    }

    fn provisioner(
        dir: &TempDir,
        engine: Arc<RecordingEngine>,
        hosts: Vec<DiscoveredHost>,
    ) -> ScanProvisioner {
        ScanProvisioner::new(
            engine,
            Arc::new(FixedDiscoverer(hosts)),
            RegistryStore::new(dir.path().join("scan_state.json")),
            EngineConfig::default(),
        )
    }

    fn request(targets: TargetSelection) -> ProvisionRequest {
        ProvisionRequest {
            scan_name: "weekly-web".into(),
            targets,
            frequency: "WEEKLY".into(),
            receiver_email: "ops@example.com".into(),
        }
    }

    #[tokio::test]
    async fn test_create_orders_engine_calls_and_registers() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);

        let record = p
            .create(request(TargetSelection::Manual(vec![
                "10.0.0.5 web01.example.com".into(),
                "10.0.0.5".into(),
            ])))
            .await
            .unwrap();

        let calls = engine.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].starts_with("create_target weekly-web [10.0.0.5,web01.example.com]"));
        assert_eq!(calls[1], "create_schedule weekly-web_WEEKLY Europe/Warsaw");
        assert!(calls[2].starts_with("create_task weekly-web target-1 schedule-1"));

        assert_eq!(record.task_id, "task-1");
        assert!(record.report_name.starts_with("weekly-web_"));
        assert_eq!(record.frequency, "WEEKLY");
        assert_eq!(record.last_known_status, None);

        let listed = p.list().unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_engine_calls() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);

        let mut bad_email = request(TargetSelection::Manual(vec!["10.0.0.5".into()]));
        bad_email.receiver_email = "not-an-address".into();
        assert!(p.create(bad_email).await.is_err());

        let mut no_name = request(TargetSelection::Manual(vec!["10.0.0.5".into()]));
        no_name.scan_name = "  ".into();
        assert!(p.create(no_name).await.is_err());

        let mut no_freq = request(TargetSelection::Manual(vec!["10.0.0.5".into()]));
        no_freq.frequency = String::new();
        assert!(p.create(no_freq).await.is_err());

        assert!(p.create(request(TargetSelection::Manual(vec![]))).await.is_err());
        assert!(p
            .create(request(TargetSelection::Discovered(vec![])))
            .await
            .is_err());

        assert!(engine.calls().is_empty());
        assert!(p.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovered_hosts_become_addresses() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![host(7, "db01"), host(9, "db02")]);

        let picked = vec![host(9, "db02")];
        let record = p
            .create(request(TargetSelection::Discovered(picked)))
            .await
            .unwrap();
        assert_eq!(record.target_spec, vec!["10.0.0.9".to_string()]);

        let all = p
            .create(request(TargetSelection::DiscoverAll("10.0.0.0/28".into())))
            .await;
        // Same engine task id twice is a duplicate registration
        assert!(matches!(all, Err(Error::OrphanedTask { .. })));
        assert!(engine.calls()[3].contains("[10.0.0.7,10.0.0.9]"));
    }

    #[tokio::test]
    async fn test_empty_discovery_aborts_before_engine() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);

        let err = p
            .create(request(TargetSelection::DiscoverAll("10.0.0.0/28".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_step_aborts_the_rest() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::failing_on("create_schedule"));
        let p = provisioner(&dir, engine.clone(), vec![]);

        let err = p
            .create(request(TargetSelection::Manual(vec!["10.0.0.5".into()])))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineQuery { .. }));
        assert_eq!(engine.calls().len(), 2);
        assert!(p.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_reports_orphan() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);
        std::fs::write(dir.path().join("scan_state.json"), "{ broken").unwrap();

        let err = p
            .create(request(TargetSelection::Manual(vec!["10.0.0.5".into()])))
            .await
            .unwrap_err();
        match err {
            Error::OrphanedTask { task_id, .. } => assert_eq!(task_id, "task-1"),
            other => panic!("expected orphaned task, got {:?}", other),
        }
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_engine_first_then_registry() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);
        p.create(request(TargetSelection::Manual(vec!["10.0.0.5".into()])))
            .await
            .unwrap();

        let removed = p.delete("task-1").await.unwrap();
        assert_eq!(removed.task_id, "task-1");
        assert_eq!(engine.calls().last().unwrap(), "delete_task task-1");
        assert!(p.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_record_when_engine_fails() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::failing_on("delete_task"));
        let p = provisioner(&dir, engine.clone(), vec![]);
        p.create(request(TargetSelection::Manual(vec!["10.0.0.5".into()])))
            .await
            .unwrap();

        assert!(p.delete("task-1").await.is_err());
        assert_eq!(p.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_task() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let p = provisioner(&dir, engine.clone(), vec![]);

        assert!(matches!(
            p.delete("nope").await,
            Err(Error::TaskNotFound { .. })
        ));
        assert!(engine.calls().is_empty());
    }
}
