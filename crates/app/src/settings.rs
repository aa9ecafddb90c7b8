//! Handles settings for the application. Configuration is written in
//! `settings.toml`; any key can be overridden from the environment with the
//! `HARAMBEE__` prefix, e.g. `HARAMBEE__MPESA__PASSKEY`.
//!
//! See `settings.toml` for the configuration.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use engine::{EnginePolicy, gateway::MpesaConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
}

fn default_initiation_timeout_secs() -> u64 {
    30
}

fn default_max_consecutive_failures() -> i32 {
    3
}

fn default_recurring_poll_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_initiation_timeout_secs")]
    pub initiation_timeout_secs: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: i32,
    #[serde(default = "default_recurring_poll_secs")]
    pub recurring_poll_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            initiation_timeout_secs: default_initiation_timeout_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            recurring_poll_secs: default_recurring_poll_secs(),
        }
    }
}

impl EngineSettings {
    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            initiation_timeout: Duration::from_secs(self.initiation_timeout_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            ..EnginePolicy::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub server: Option<Server>,
    pub mpesa: MpesaConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .add_source(Environment::with_prefix("HARAMBEE").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
