//! vulnwatch Monitor - notification daemon
//!
//! Runs on the scanning host next to gvmd. Every poll interval it reconciles
//! the tasks in the shared state file against the engine and mails finished
//! reports. Stops cleanly on SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vulnwatch_common::logging::{self, LogConfig, LogFormat};
use vulnwatch_common::Config;
use vulnwatch_gmp::{GmpClient, GmpConfig};
use vulnwatch_monitor::StatusMonitor;
use vulnwatch_notify::{ReportDispatcher, SmtpMailer};
use vulnwatch_registry::RegistryStore;

/// vulnwatch notification daemon
#[derive(Parser, Debug)]
#[command(name = "vulnwatch-monitor")]
#[command(author = "Forge Cyber Defense")]
#[command(version)]
#[command(about = "Watch scan tasks and mail finished reports", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "VULNWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Override the state file path
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Run a single reconciliation pass and exit
    #[arg(long)]
    once: bool,
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

    let mut log_config = LogConfig::from_settings(&config.logging);
    if let Some(level) = &args.log_level {
        log_config = log_config.level(level);
    }
    if let Some(format) = &args.log_format {
        log_config = log_config.format(LogFormat::parse(format));
    }
    logging::init_logging_with_config(log_config);

    info!("vulnwatch monitor v{}", env!("CARGO_PKG_VERSION"));
    if config_path.exists() {
        info!("Loaded config from {}", config_path.display());
    } else {
        debug!("Config file {} not found, using defaults", config_path.display());
    }

    config.validate()?;
    config.validate_mail()?;

    // Bad credentials stop startup; an unreachable gvmd is retried on every poll
    let gmp_config = GmpConfig::from(&config.engine);
    let session = match GmpClient::connect(gmp_config.clone()).await {
        Ok(session) => session,
        Err(e) if e.is_retryable() => {
            warn!("gvmd not reachable yet, will retry on the next poll: {}", e);
            GmpClient::new(gmp_config)
        }
        Err(e) => return Err(e).context("opening GMP session"),
    };
    let session = Arc::new(session);
    let mailer = Arc::new(SmtpMailer::new(&config.mail)?);
    let dispatcher = ReportDispatcher::new(
        session.clone(),
        mailer,
        config.report.clone(),
        &config.mail,
    );
    let monitor = StatusMonitor::new(
        RegistryStore::new(&config.monitor.state_file),
        session.clone(),
        dispatcher,
        config.monitor.poll_interval(),
    );

    let outcome = if args.once {
        monitor.reconcile_once().await.map(|report| {
            info!("Reconciliation finished: {}", report);
        })
    } else {
        let shutdown = CancellationToken::new();
        tokio::spawn(wait_for_signal(shutdown.clone()));
        info!("Monitor running. Press Ctrl+C to exit.");
        monitor.run(shutdown).await
    };

    session.close().await;

    if let Err(e) = outcome {
        error!("Monitor exited with error [{}]: {}", e.code(), e);
        return Err(e.into());
    }

    info!("Monitor shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }

    info!("Finishing current iteration before exit");
    shutdown.cancel();
}
