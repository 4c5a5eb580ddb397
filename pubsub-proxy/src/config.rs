use proxy::config::{Config as ProxyConfig, ValidationError};
use publisher::BackendConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

fn default_log_level() -> String {
    "info".into()
}

fn default_metrics_prefix() -> String {
    "pubsub_proxy".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
}

/// Values given on the command line or through the environment. They take
/// precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub project_id: Option<String>,
    pub port: Option<u16>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Loads the file if one is given, applies `overrides` and validates.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.resolve(overrides)
    }

    fn resolve(mut self, overrides: Overrides) -> Result<Self, ConfigError> {
        if let Some(project_id) = overrides.project_id.filter(|p| !p.is_empty()) {
            self.project_id = project_id;
        }
        if let Some(port) = overrides.port {
            self.proxy.listener.port = port;
        }

        if self.project_id.is_empty() {
            return Err(ConfigError::MissingProject);
        }
        self.proxy.validate()?;

        Ok(self)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("no project id configured, set GCP_PROJECT_ID or pass --project")]
    MissingProject,
    #[error("invalid proxy config: {0}")]
    Invalid(#[from] ValidationError),
}
