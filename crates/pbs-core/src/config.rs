//! Coordinator and client configuration.
//!
//! Loaded from an optional JSON file, then overridden from `PBS_*` environment
//! variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REPORTING_WINDOW_OFFSET_DAYS: u32 = 30;
pub const DEFAULT_BUDGET_LIMIT: u32 = 1;
pub const DEFAULT_RECORD_TTL_BUFFER_DAYS: u32 = 1;

/// One coordinator the distributed client fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorEndpoint {
    /// Display name used in logs and errors, e.g. "coordinator-a".
    pub name: String,
    /// Base URL of the coordinator's budget service.
    pub base_url: String,
    /// Endpoint that mints bearer tokens for this coordinator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_endpoint: Option<String>,
    /// Fixed bearer token, used when no auth endpoint is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub coordinators: Vec<CoordinatorEndpoint>,
    /// Total attempts per coordinator call, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_offset_days")]
    pub reporting_window_offset_days: u32,
    #[serde(default = "default_budget_limit")]
    pub budget_limit: u32,
    #[serde(default = "default_ttl_buffer_days")]
    pub record_ttl_buffer_days: u32,
    /// Bearer token -> reporting origins its holder may charge.
    #[serde(default)]
    pub allowed_identities: HashMap<String, Vec<String>>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
fn default_offset_days() -> u32 {
    DEFAULT_REPORTING_WINDOW_OFFSET_DAYS
}
fn default_budget_limit() -> u32 {
    DEFAULT_BUDGET_LIMIT
}
fn default_ttl_buffer_days() -> u32 {
    DEFAULT_RECORD_TTL_BUFFER_DAYS
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            coordinators: Vec::new(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reporting_window_offset_days: DEFAULT_REPORTING_WINDOW_OFFSET_DAYS,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            record_ttl_buffer_days: DEFAULT_RECORD_TTL_BUFFER_DAYS,
            allowed_identities: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    /// Load from `path` if it exists, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                let config: BudgetConfig = serde_json::from_str(&raw)
                    .map_err(|e| Error::Config(format!("{}: {}", p.display(), e)))?;
                info!("Loaded configuration from {}", p.display());
                config
            }
            _ => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `PBS_*` variables resolved through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PBS_PORT") {
            self.port = parse_var("PBS_PORT", &v)?;
        }
        if let Some(v) = lookup("PBS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PBS_BUDGET_LIMIT") {
            self.budget_limit = parse_var("PBS_BUDGET_LIMIT", &v)?;
        }
        if let Some(v) = lookup("PBS_REPORTING_WINDOW_OFFSET_DAYS") {
            self.reporting_window_offset_days =
                parse_var("PBS_REPORTING_WINDOW_OFFSET_DAYS", &v)?;
        }
        if let Some(v) = lookup("PBS_RETRY_ATTEMPTS") {
            self.retry_attempts = parse_var("PBS_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("PBS_RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_var("PBS_RETRY_DELAY_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.budget_limit == 0 {
            return Err(Error::Config("budget_limit must be at least 1".into()));
        }
        if self.retry_attempts == 0 {
            return Err(Error::Config("retry_attempts must be at least 1".into()));
        }
        if self.reporting_window_offset_days == 0 {
            return Err(Error::Config(
                "reporting_window_offset_days must be at least 1".into(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for c in &self.coordinators {
            if c.base_url.is_empty() {
                return Err(Error::Config(format!(
                    "coordinator {} has an empty base_url",
                    c.name
                )));
            }
            if !names.insert(c.name.as_str()) {
                return Err(Error::Config(format!(
                    "coordinator name {} is configured twice",
                    c.name
                )));
            }
        }
        Ok(())
    }

    /// Coordinators for client use; errors when none are configured.
    pub fn require_coordinators(&self) -> Result<&[CoordinatorEndpoint]> {
        if self.coordinators.is_empty() {
            return Err(Error::Config("no coordinators configured".into()));
        }
        Ok(&self.coordinators)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", name, value)))
}
