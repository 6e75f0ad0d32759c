//! Configuration management for vulnwatch components

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vulnwatch_core::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scanning engine (gvmd) connection settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Report rendering and storage settings
    #[serde(default)]
    pub report: ReportConfig,

    /// Outgoing mail settings
    #[serde(default)]
    pub mail: MailConfig,

    /// Status monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Host discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Merge with environment variables (VULNWATCH_ prefix)
    pub fn merge_env(mut self) -> Self {
        // Engine settings
        if let Ok(val) = std::env::var("VULNWATCH_GVMD_SOCKET") {
            self.engine.socket_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("VULNWATCH_GVMD_USERNAME") {
            self.engine.username = val;
        }
        if let Ok(val) = std::env::var("VULNWATCH_GVMD_PASSWORD") {
            self.engine.password = val;
        }

        // Mail settings
        if let Ok(val) = std::env::var("VULNWATCH_SMTP_HOST") {
            self.mail.smtp_host = val;
        }
        if let Ok(val) = std::env::var("VULNWATCH_SMTP_PORT") {
            if let Ok(n) = val.parse() {
                self.mail.smtp_port = n;
            }
        }
        if let Ok(val) = std::env::var("VULNWATCH_SMTP_USERNAME") {
            self.mail.username = Some(val);
        }
        if let Ok(val) = std::env::var("VULNWATCH_SMTP_PASSWORD") {
            self.mail.password = Some(val);
        }
        if let Ok(val) = std::env::var("VULNWATCH_MAIL_FROM") {
            self.mail.from = val;
        }

        // Monitor settings
        if let Ok(val) = std::env::var("VULNWATCH_STATE_FILE") {
            self.monitor.state_file = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("VULNWATCH_POLL_INTERVAL") {
            if let Ok(n) = val.parse() {
                self.monitor.poll_interval_seconds = n;
            }
        }
        if let Ok(val) = std::env::var("VULNWATCH_REPORTS_DIR") {
            self.report.output_dir = PathBuf::from(val);
        }

        // Logging
        if let Ok(val) = std::env::var("VULNWATCH_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("VULNWATCH_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }

    /// Reject values that would only fail later at runtime
    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_seconds == 0 {
            return Err(Error::InvalidConfig {
                key: "monitor.poll_interval_seconds".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.engine.request_timeout_seconds == 0 {
            return Err(Error::InvalidConfig {
                key: "engine.request_timeout_seconds".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.engine.username.is_empty() {
            return Err(Error::MissingConfig {
                key: "engine.username".into(),
            });
        }
        if self.report.extension.is_empty() || self.report.extension.contains(['/', '\\', '.']) {
            return Err(Error::InvalidConfig {
                key: "report.extension".into(),
                message: format!("{:?} is not a plain file extension", self.report.extension),
            });
        }
        Ok(())
    }

    /// Mail settings are only required by the monitor
    pub fn validate_mail(&self) -> Result<()> {
        if self.mail.smtp_host.is_empty() {
            return Err(Error::MissingConfig {
                key: "mail.smtp_host".into(),
            });
        }
        if self.mail.from.is_empty() {
            return Err(Error::MissingConfig {
                key: "mail.from".into(),
            });
        }
        Ok(())
    }
}

/// Scanning engine (gvmd) connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the gvmd Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// GMP username
    #[serde(default = "default_username")]
    pub username: String,

    /// GMP password (prefer VULNWATCH_GVMD_PASSWORD)
    #[serde(default)]
    pub password: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Port list used for new targets
    #[serde(default = "default_port_list_id")]
    pub port_list_id: String,

    /// Scan config used for new tasks
    #[serde(default = "default_scan_config_id")]
    pub scan_config_id: String,

    /// Scanner used for new tasks
    #[serde(default = "default_scanner_id")]
    pub scanner_id: String,

    /// Timezone sent with new schedules
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Minutes between scan creation and the first scheduled run
    #[serde(default = "default_start_delay")]
    pub schedule_start_delay_minutes: u32,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/gvmd/gvmd.sock")
}

fn default_username() -> String {
    String::from("admin")
}

fn default_request_timeout() -> u64 {
    60
}

fn default_port_list_id() -> String {
    // All IANA assigned TCP and UDP
    String::from("4a4717fe-57d2-11e1-9a26-406186ea4fc5")
}

fn default_scan_config_id() -> String {
    // Full and fast
    String::from("daba56c8-73ec-11df-a475-002264764cea")
}

fn default_scanner_id() -> String {
    // Default OpenVAS scanner
    String::from("08b69003-5fc2-4037-a479-93b440211c73")
}

fn default_timezone() -> String {
    String::from("Europe/Warsaw")
}

fn default_start_delay() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            username: default_username(),
            password: String::new(),
            request_timeout_seconds: default_request_timeout(),
            port_list_id: default_port_list_id(),
            scan_config_id: default_scan_config_id(),
            scanner_id: default_scanner_id(),
            timezone: default_timezone(),
            schedule_start_delay_minutes: default_start_delay(),
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Report rendering and storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Report format id (PDF by default)
    #[serde(default = "default_report_format_id")]
    pub format_id: String,

    /// Result filter applied when rendering
    #[serde(default = "default_report_filter")]
    pub filter: String,

    /// Directory artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File extension for artifacts, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_report_format_id() -> String {
    String::from("c402cc3e-b531-11e1-9163-406186ea4fc5")
}

fn default_report_filter() -> String {
    String::from("apply_overrides=0 levels=hmlg rows=100 min_qod=70 first=1 sort-reverse=severity")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_extension() -> String {
    String::from("pdf")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format_id: default_report_format_id(),
            filter: default_report_filter(),
            output_dir: default_output_dir(),
            extension: default_extension(),
        }
    }
}

/// Outgoing mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// SMTP relay host
    #[serde(default)]
    pub smtp_host: String,

    /// SMTP port (STARTTLS)
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP login (prefer VULNWATCH_SMTP_USERNAME)
    pub username: Option<String>,

    /// SMTP password (prefer VULNWATCH_SMTP_PASSWORD)
    pub password: Option<String>,

    /// Sender address
    #[serde(default)]
    pub from: String,

    /// Plain-text body of the report email
    #[serde(default = "default_mail_body")]
    pub body: String,

    /// SMTP timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_seconds: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_mail_body() -> String {
    String::from("Scan report")
}

fn default_smtp_timeout() -> u64 {
    30
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            from: String::new(),
            body: default_mail_body(),
            timeout_seconds: default_smtp_timeout(),
        }
    }
}

/// Status monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Registry state file shared by monitor and console
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Seconds between polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("scan_state.json")
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Host discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Timeout per probe in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Ports probed with TCP connect
    #[serde(default = "default_tcp_ports")]
    pub tcp_ports: Vec<u16>,

    /// Maximum concurrent probes
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Only offer hosts that have a reverse DNS name
    #[serde(default = "default_true")]
    pub require_hostname: bool,
}

fn default_probe_timeout() -> u64 {
    1500
}

fn default_tcp_ports() -> Vec<u16> {
    vec![22, 80, 443, 445, 3389, 8080]
}

fn default_concurrency() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout(),
            tcp_ports: default_tcp_ports(),
            concurrency: default_concurrency(),
            require_hostname: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
