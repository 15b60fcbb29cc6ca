//! Agent configuration, loadable from TOML and environment.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use es_mqtt_channel::{MqttConfig, RetryPolicy};
use es_sensor::IioConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {message}")]
    Io { path: String, message: String },

    #[error("invalid config '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
}

/// Top-level configuration for the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Prefix for reading topics (`{topic_base}/{path}`).
    #[serde(default = "default_topic_base")]
    pub topic_base: String,
    /// Pause between sampling cycles, in seconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,
    /// MQTT connection settings.
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Reconnect backoff.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Sensor source.
    #[serde(default)]
    pub sensor: IioConfig,
}

/// Reconnect backoff bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_topic_base() -> String {
    "sensors/bme680".to_string()
}

fn default_sample_interval() -> u64 {
    10
}

fn default_initial_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    300
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.initial_delay_secs),
            Duration::from_secs(self.max_delay_secs),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            topic_base: default_topic_base(),
            sample_interval_secs: default_sample_interval(),
            mqtt: MqttConfig::default(),
            retry: RetryConfig::default(),
            sensor: IioConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// File (if given) or defaults, then `MQTT_HOST`, `MQTT_PORT` and
    /// `MQTT_TOPIC_BASE` from the process environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.broker_port = port.trim().parse().map_err(|_| ConfigError::Env {
                var: "MQTT_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(topic_base) = lookup("MQTT_TOPIC_BASE") {
            self.topic_base = topic_base;
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    /// `host:port` for log fields.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.mqtt.broker_host, self.mqtt.broker_port)
    }
}
