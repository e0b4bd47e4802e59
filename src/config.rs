//! Config file model. A single JSON document, loaded once at startup and
//! never re-read: there is no hot-reload, matching the broker's "no
//! persistent cross-request state" concurrency model — configuration is
//! process lifetime, not request lifetime.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::catalog::{Catalog, Service};
use crate::error::BrokerError;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Error | LogLevel::Fatal => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TlsConfig {
    pub certificate: String,
    pub private_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RdsConfig {
    pub region: String,
    pub db_prefix: String,
    pub aws_partition: String,
    pub broker_name: String,
    pub master_password_seed: String,
    #[serde(default)]
    pub allow_user_provision_parameters: bool,
    #[serde(default)]
    pub allow_user_update_parameters: bool,
    #[serde(default)]
    pub allow_user_bind_parameters: bool,
    pub catalog: CatalogConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogConfig {
    pub services: Vec<Service>,
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub run_housekeeping: bool,
    #[serde(default)]
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub keep_snapshots_for_days: Option<i64>,
    pub rds_config: RdsConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| BrokerError::BadConfig(format!("reading {}: {err}", path.display())))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|err| BrokerError::BadConfig(format!("parsing {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BrokerError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(BrokerError::BadConfig(
                "username and password are required for basic auth".to_owned(),
            ));
        }
        if self.run_housekeeping {
            if self.cron_schedule.is_none() {
                return Err(BrokerError::BadConfig(
                    "cron_schedule is required when run_housekeeping is true".to_owned(),
                ));
            }
            match self.keep_snapshots_for_days {
                Some(days) if days > 0 => {}
                _ => {
                    return Err(BrokerError::BadConfig(
                        "keep_snapshots_for_days must be a positive integer when run_housekeeping is true"
                            .to_owned(),
                    ));
                }
            }
        }
        if let Some(schedule) = &self.cron_schedule {
            crate::housekeeping::parse_schedule(schedule)?;
        }
        Ok(())
    }

    pub fn build_catalog(&self) -> Result<Catalog, BrokerError> {
        Catalog::load(self.rds_config.catalog.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "port": 3000,
            "log_level": "INFO",
            "username": "broker",
            "password": "secret",
            "run_housekeeping": false,
            "rds_config": {
                "region": "us-east-1",
                "db_prefix": "rdsbroker",
                "aws_partition": "aws",
                "broker_name": "rds-broker",
                "master_password_seed": "seed",
                "catalog": { "services": [] }
            }
        }"#
    }

    #[test]
    fn loads_minimal_config() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn rejects_missing_credentials() {
        let json = sample_json().replace("\"secret\"", "\"\"");
        let config: Config = serde_json::from_str(&json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn requires_cron_schedule_when_housekeeping_enabled() {
        let json = sample_json().replace("\"run_housekeeping\": false", "\"run_housekeeping\": true");
        let config: Config = serde_json::from_str(&json).unwrap();
        assert!(config.validate().is_err());
    }
}
