//! vulnwatch - manage recurring vulnerability scans
//!
//! Without a subcommand the interactive menu starts. The subcommands cover
//! the same operations for scripts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use vulnwatch_common::logging::{self, LogConfig, LogFormat};
use vulnwatch_common::Config;
use vulnwatch_console::menu::{self, describe_failure, format_task_table};
use vulnwatch_console::{ProvisionRequest, ScanProvisioner, TargetSelection};
use vulnwatch_gmp::{GmpClient, GmpConfig};
use vulnwatch_network::TcpHostDiscovery;
use vulnwatch_registry::RegistryStore;

/// vulnwatch management console
#[derive(Parser, Debug)]
#[command(name = "vulnwatch")]
#[command(author = "Forge Cyber Defense")]
#[command(version)]
#[command(about = "Create, delete and list recurring vulnerability scans", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "VULNWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Override the state file path
    #[arg(long)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tracked scans
    List,

    /// Create a recurring scan
    Create(CreateArgs),

    /// Delete a scan from the engine and stop tracking it
    Delete {
        /// Engine task id
        task_id: String,
    },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    /// Scan name
    #[arg(long)]
    name: String,

    /// Target addresses or hostnames
    #[arg(long, value_delimiter = ',', num_args = 1.., required_unless_present = "discover", conflicts_with = "discover")]
    hosts: Vec<String>,

    /// Scan every named host found in this network range
    #[arg(long)]
    discover: Option<String>,

    /// Recurrence (HOURLY, DAILY, WEEKLY, MONTHLY, YEARLY)
    #[arg(long, default_value = "WEEKLY")]
    frequency: String,

    /// Recipient of the report emails
    #[arg(long)]
    email: String,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/vulnwatch/vulnwatch.toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?
        .merge_env();
    if let Some(state_file) = &args.state_file {
        config.monitor.state_file = state_file.clone();
    }

    let mut log_config = LogConfig::from_settings(&config.logging)
        .level(&args.log_level)
        .to_stderr();
    if let Some(format) = &args.log_format {
        log_config = log_config.format(LogFormat::parse(format));
    }
    logging::init_logging_with_config(log_config);
    debug!("Using state file {}", config.monitor.state_file.display());

    config.validate()?;
    let store = RegistryStore::new(&config.monitor.state_file);

    // Listing needs only the state file
    if let Some(Command::List) = &args.command {
        print!("{}", format_task_table(&store.load()?.into_records()));
        return Ok(());
    }

    let session = Arc::new(
        GmpClient::connect(GmpConfig::from(&config.engine))
            .await
            .context("opening GMP session")?,
    );
    let provisioner = ScanProvisioner::new(
        session.clone(),
        Arc::new(TcpHostDiscovery::new(&config.discovery)),
        store,
        config.engine.clone(),
    );

    let outcome = match args.command {
        None => menu::run_menu(&provisioner).await,
        Some(Command::Create(create)) => {
            let targets = match create.discover {
                Some(range) => TargetSelection::DiscoverAll(range),
                None => TargetSelection::Manual(create.hosts),
            };
            provisioner
                .create(ProvisionRequest {
                    scan_name: create.name,
                    targets,
                    frequency: create.frequency,
                    receiver_email: create.email,
                })
                .await
                .map(|record| {
                    println!("{}", record.task_id);
                })
                .map_err(anyhow::Error::from)
        }
        Some(Command::Delete { task_id }) => provisioner
            .delete(&task_id)
            .await
            .map(|record| println!("Deleted {} ({})", record.scan_name, record.task_id))
            .map_err(anyhow::Error::from),
        Some(Command::List) => Ok(()),
    };

    session.close().await;

    if let Err(e) = outcome {
        eprintln!("{}", describe_failure(&e));
        std::process::exit(1);
    }
    Ok(())
}
