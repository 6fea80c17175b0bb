use super::{BillingConfig, ReporterConfig};
use crate::error::{MeterError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for daily rolling files; stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Admin API listen address; the API is disabled when unset
    #[serde(default)]
    pub api_listen_addr: Option<String>,

    #[serde(default)]
    pub console_port: Option<u16>,

    /// Billing backend. Without it every connection is anonymous.
    #[serde(default)]
    pub billing: Option<BillingConfig>,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub reporter: ReporterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_resync_interval_secs() -> u64 {
    60
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl MeterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: MeterConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(billing) = &self.billing {
            if billing.base_url.trim().is_empty() {
                return Err(MeterError::Config("billing.base_url is empty".to_string()));
            }
            if billing.node_id.trim().is_empty() {
                return Err(MeterError::Config("billing.node_id is empty".to_string()));
            }
            if billing.request_timeout_secs == 0 {
                return Err(MeterError::Config(
                    "billing.request_timeout_secs must be positive".to_string(),
                ));
            }
        }
        if self.directory.resync_interval_secs == 0 || self.directory.heartbeat_interval_secs == 0 {
            return Err(MeterError::Config(
                "directory intervals must be positive".to_string(),
            ));
        }
        if self.reporter.batch_size == 0 {
            return Err(MeterError::Config("reporter.batch_size must be positive".to_string()));
        }
        if self.reporter.max_attempts == 0 {
            return Err(MeterError::Config(
                "reporter.max_attempts must be positive".to_string(),
            ));
        }
        if self.reporter.flush_interval_secs == 0 {
            return Err(MeterError::Config(
                "reporter.flush_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
