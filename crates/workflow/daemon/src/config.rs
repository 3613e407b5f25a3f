//! Configuration for approvald

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use workflow_engine::{RetryPolicy, StaticDirectory};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Organization directory used to resolve approvers
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Buffered deadline callbacks between the timer and the scheduler
    #[serde(default = "default_timer_channel_capacity")]
    pub timer_channel_capacity: usize,

    /// How often steps waiting on the directory are retried
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// How often open steps are checked for missed deadlines
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// First delay after a failed approver lookup
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Cap on the approver lookup backoff
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_channel_capacity: default_timer_channel_capacity(),
            retry_interval_secs: default_retry_interval(),
            sweep_interval_secs: default_sweep_interval(),
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
        }
    }
}

impl SchedulerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_secs: self.retry_base_secs,
            max_secs: self.retry_max_secs,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Static organization data
///
/// ```toml
/// [directory.roles]
/// director = ["dana"]
///
/// [directory.managers]
/// alice = "morgan"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Role name to members
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,

    /// Department name to members
    #[serde(default)]
    pub departments: BTreeMap<String, Vec<String>>,

    /// Employee to direct manager
    #[serde(default)]
    pub managers: BTreeMap<String, String>,
}

impl DirectoryConfig {
    pub fn build(&self) -> StaticDirectory {
        let mut directory = StaticDirectory::new();
        for (role, members) in &self.roles {
            directory = directory.with_role(role.clone(), members.iter().cloned());
        }
        for (department, members) in &self.departments {
            directory = directory.with_department(department.clone(), members.iter().cloned());
        }
        for (employee, manager) in &self.managers {
            directory = directory.with_manager(employee.clone(), manager.clone());
        }
        directory
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_timer_channel_capacity() -> usize {
    1024
}

fn default_retry_interval() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_retry_base() -> u64 {
    RetryPolicy::default().base_secs
}

fn default_retry_max() -> u64 {
    RetryPolicy::default().max_secs
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `APPROVALD_`-prefixed environment variables (`__` between sections)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APPROVALD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
