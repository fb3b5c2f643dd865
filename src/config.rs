//! Environment-driven settings for the binaries.

use anyhow::{Context, Result};
use rsession_lite::credentials::Secret;
use rsession_lite::health::HealthMonitor;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::greeting::GreetingSettings;

pub const DEFAULT_SERVICE_ADDR: &str = "127.0.0.1:8888";
pub const DEFAULT_USERNAME: &str = "memphis";
pub const DEFAULT_PASSWORD: &str = "pwd";

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn millis_var(name: &str, default_ms: u64) -> Result<Duration> {
    parse_var(name, default_ms).map(Duration::from_millis)
}

/// Settings for the `service` binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub addr: String,
    pub greetings: GreetingSettings,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            addr: var_or("SERVICE_ADDR", DEFAULT_SERVICE_ADDR),
            greetings: GreetingSettings {
                interval: millis_var("GREETING_INTERVAL_MS", 1000)?,
                limit: parse_var("GREETING_LIMIT", 100)?,
            },
        })
    }
}

/// Settings for the `client` binary.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub username: String,
    pub password: Secret,
    pub health: HealthMonitor,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let health = HealthMonitor::new(
            parse_var(
                "HEALTH_UNHEALTHY_PROBABILITY",
                HealthMonitor::DEFAULT_UNHEALTHY_PROBABILITY,
            )?,
            millis_var("HEALTH_INTERVAL_MS", 1000)?,
            parse_var("HEALTH_LIMIT", HealthMonitor::DEFAULT_LIMIT)?,
        )?;

        Ok(Self {
            addr: var_or("SERVICE_ADDR", DEFAULT_SERVICE_ADDR),
            username: var_or("RSESSION_USERNAME", DEFAULT_USERNAME),
            password: Secret::new(var_or("RSESSION_PASSWORD", DEFAULT_PASSWORD)),
            health,
        })
    }
}

/// Settings for the `integration` binary.
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub client: ClientConfig,
    pub inbox_dir: PathBuf,
    pub poll_interval: Duration,
}

impl IntegrationConfig {
    pub fn from_env() -> Result<Self> {
        let inbox_dir = match std::env::var_os("INBOX_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var_os("HOME").context("neither INBOX_DIR nor HOME is set")?;
                PathBuf::from(home).join("Desktop").join("in")
            }
        };

        Ok(Self {
            client: ClientConfig::from_env()?,
            inbox_dir,
            poll_interval: millis_var("INBOX_POLL_MS", 1000)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_debug_hides_password() {
        let config = ClientConfig {
            addr: DEFAULT_SERVICE_ADDR.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: Secret::new("hunter2"),
            health: HealthMonitor::default(),
        };

        let debug = format!("{config:?}");
        assert!(debug.contains("memphis"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
