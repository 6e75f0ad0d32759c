//! Interactive management menu

use anyhow::Result;
use dialoguer::console::Term;
use dialoguer::{Confirm, Input, MultiSelect, Select};

use vulnwatch_core::{Error, TaskRecord};
use vulnwatch_notify::validate_recipient;

use crate::provision::{ProvisionRequest, ScanProvisioner, TargetSelection};

/// Recurrence tokens offered in the menu
pub const FREQUENCIES: [&str; 5] = ["HOURLY", "DAILY", "WEEKLY", "MONTHLY", "YEARLY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Create,
    Delete,
    List,
    Exit,
}

impl MenuItem {
    const ALL: [MenuItem; 4] = [
        MenuItem::Create,
        MenuItem::Delete,
        MenuItem::List,
        MenuItem::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuItem::Create => "Create a new scan",
            MenuItem::Delete => "Delete an existing scan",
            MenuItem::List => "Display existing scans",
            MenuItem::Exit => "Exit",
        }
    }
}

/// Run the menu until the operator picks Exit
///
/// A failed action is reported and the menu shown again; only terminal
/// errors (the prompt itself failing) end the loop.
pub async fn run_menu(provisioner: &ScanProvisioner) -> Result<()> {
    let labels: Vec<&str> = MenuItem::ALL.iter().map(|item| item.label()).collect();

    loop {
        let choice = Select::new()
            .with_prompt("vulnwatch")
            .items(&labels)
            .default(0)
            .interact_on(&Term::stderr())?;

        let outcome = match MenuItem::ALL[choice] {
            MenuItem::Create => create_scan(provisioner).await,
            MenuItem::Delete => delete_scan(provisioner).await,
            MenuItem::List => provisioner
                .list()
                .map(|records| print!("{}", format_task_table(&records)))
                .map_err(anyhow::Error::from),
            MenuItem::Exit => break,
        };

        if let Err(e) = outcome {
            eprintln!("{}", describe_failure(&e));
        }
    }
    Ok(())
}

async fn create_scan(provisioner: &ScanProvisioner) -> Result<()> {
    let term = Term::stderr();

    let source = Select::new()
        .with_prompt("Targets")
        .items(&["Enter addresses manually", "Select hosts discovered on a network"][..])
        .default(0)
        .interact_on(&term)?;

    let targets = if source == 0 {
        let answer: String = Input::new()
            .with_prompt("Target addresses (space or comma separated)")
            .interact_text_on(&term)?;
        TargetSelection::Manual(vec![answer])
    } else {
        let range: String = Input::new()
            .with_prompt("Network (CIDR, range or single address)")
            .interact_text_on(&term)?;
        eprintln!("Searching for hosts in {}. This may take a while.", range.trim());

        let hosts = provisioner.discover(&range).await?;
        if hosts.is_empty() {
            eprintln!("No named hosts found in {}.", range.trim());
            return Ok(());
        }
        let labels: Vec<String> = hosts.iter().map(|h| h.label()).collect();
        let picked = MultiSelect::new()
            .with_prompt("Hosts to scan (space to toggle, enter to confirm)")
            .items(&labels)
            .interact_on(&term)?;
        if picked.is_empty() {
            eprintln!("No hosts selected.");
            return Ok(());
        }
        TargetSelection::Discovered(picked.into_iter().map(|i| hosts[i].clone()).collect())
    };

    let frequency = Select::new()
        .with_prompt("Scan frequency")
        .items(&FREQUENCIES[..])
        .default(2)
        .interact_on(&term)?;

    let receiver_email: String = Input::new()
        .with_prompt("Email address for reports")
        .validate_with(|input: &String| -> std::result::Result<(), String> {
            validate_recipient(input).map_err(|e| e.to_string())
        })
        .interact_text_on(&term)?;

    let scan_name: String = Input::new()
        .with_prompt("Scan name")
        .interact_text_on(&term)?;

    let record = provisioner
        .create(ProvisionRequest {
            scan_name,
            targets,
            frequency: FREQUENCIES[frequency].to_string(),
            receiver_email,
        })
        .await?;

    println!(
        "Scan '{}' created (task {}). Reports go to {}.",
        record.scan_name, record.task_id, record.receiver_email
    );
    Ok(())
}

async fn delete_scan(provisioner: &ScanProvisioner) -> Result<()> {
    let term = Term::stderr();
    let records = provisioner.list()?;
    if records.is_empty() {
        println!("No tasks to delete.");
        return Ok(());
    }

    let mut labels: Vec<String> = records
        .iter()
        .map(|r| format!("{} (ID: {})", r.report_name, r.task_id))
        .collect();
    labels.push("Cancel".to_string());

    let choice = Select::new()
        .with_prompt("Scan to delete")
        .items(&labels)
        .default(labels.len() - 1)
        .interact_on(&term)?;
    let Some(record) = records.get(choice) else {
        return Ok(());
    };

    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Delete scan '{}' from the engine and stop tracking it?",
            record.scan_name
        ))
        .default(false)
        .interact_on(&term)?;
    if !confirmed {
        return Ok(());
    }

    provisioner.delete(&record.task_id).await?;
    println!("Task has been deleted.");
    Ok(())
}

/// Operator-facing message for a failed action
pub fn describe_failure(e: &anyhow::Error) -> String {
    match e.downcast_ref::<Error>() {
        Some(Error::OrphanedTask { task_id, message }) => format!(
            "Warning: task {} was created in the engine but is not tracked ({}). \
             Delete it in the engine or register it by hand.",
            task_id, message
        ),
        Some(err) => format!("Error [{}]: {}", err.code(), err),
        None => format!("Error: {:#}", e),
    }
}

/// Render records as a fixed-width table
pub fn format_task_table(records: &[TaskRecord]) -> String {
    if records.is_empty() {
        return "No scans are being tracked.\n".to_string();
    }

    let mut out = format!(
        "{:<4} {:<24} {:<38} {:<8} {:<12} {:<24} {}\n",
        "#", "SCAN NAME", "TASK ID", "FREQ", "STATUS", "TARGETS", "EMAIL"
    );
    out.push_str(&"-".repeat(130));
    out.push('\n');

    for (idx, r) in records.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<24} {:<38} {:<8} {:<12} {:<24} {}\n",
            idx + 1,
            truncate(&r.scan_name, 24),
            r.task_id,
            r.frequency,
            r.status_label(),
            truncate(&r.target_spec.join(" "), 24),
            r.receiver_email
        ));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulnwatch_core::TaskStatus;

    #[test]
    fn test_table_lists_every_record() {
        let records = vec![
            TaskRecord::new("5f1c0a4e-0000-4000-8000-000000000001", "weekly-web", "weekly-web_20240301_090000")
                .with_targets(vec!["10.0.0.5".into(), "10.0.0.6".into()])
                .with_frequency("WEEKLY")
                .with_receiver("ops@example.com")
                .with_status(TaskStatus::Done),
            TaskRecord::new("5f1c0a4e-0000-4000-8000-000000000002", "nightly", "nightly_20240301_090000")
                .with_frequency("DAILY")
                .with_receiver("sec@example.com"),
        ];

        let table = format_task_table(&records);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("#"));
        assert!(lines[2].starts_with("1 "));
        assert!(lines[2].contains("weekly-web"));
        assert!(lines[2].contains("Done"));
        assert!(lines[2].contains("10.0.0.5 10.0.0.6"));
        assert!(lines[3].contains("nightly"));
        assert!(lines[3].contains(" - "));
        assert!(lines[3].ends_with("sec@example.com"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(format_task_table(&[]), "No scans are being tracked.\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 24), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("żółć-żółć-żółć", 6), "żół...");
    }

    #[test]
    fn test_describe_orphaned_task() {
        let e = anyhow::Error::from(Error::OrphanedTask {
            task_id: "task-1".into(),
            message: "state file unreadable".into(),
        });
        let text = describe_failure(&e);
        assert!(text.starts_with("Warning"));
        assert!(text.contains("task-1"));

        let e = anyhow::Error::from(Error::TaskNotFound {
            task_id: "gone".into(),
        });
        assert!(describe_failure(&e).contains("TASK_NOT_FOUND"));
    }

    #[test]
    fn test_frequency_choices_are_valid_tokens() {
        for f in FREQUENCIES {
            assert!(vulnwatch_gmp::schedule::normalize_frequency(f).is_ok());
        }
    }
}
