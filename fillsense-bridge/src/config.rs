//! Configuration management
//!
//! Handles:
//! - MQTT broker settings and the device access token
//! - Serial port settings and the optional read timeout
//! - Bridge behaviour (topic, QoS, invalid reading policy)
//!
//! Sources, in order: built-in defaults, the TOML file, then `FILLSENSE_*`
//! environment variables (a `.env` file is honoured by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "FILLSENSE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub serial: SerialConfig,
    pub bridge: BehaviourConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    /// Device access token, sent as the MQTT username
    pub access_token: String,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Unset: wait for a line forever
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviourConfig {
    pub topic: String,
    pub qos: QosLevel,
    pub startup_delay_ms: u64,
    pub invalid_reading: InvalidReadingPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// What to do with a decoded record whose `fullness` is missing or not a number
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReadingPolicy {
    /// Stop the bridge with an error
    Abort,
    /// Log and discard the record, like an undecodable line
    Skip,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "thingsboard.cs.cf.ac.uk".to_string(),
            broker_port: 1883,
            access_token: String::new(),
            client_id: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port = if cfg!(windows) { "COM6" } else { "/dev/ttyUSB0" };
        Self {
            port: port.to_string(),
            baud_rate: 9600,
            read_timeout_ms: None,
        }
    }
}

impl Default for BehaviourConfig {
    fn default() -> Self {
        Self {
            topic: "v1/devices/me/telemetry".to_string(),
            qos: QosLevel::AtLeastOnce,
            startup_delay_ms: 500,
            invalid_reading: InvalidReadingPolicy::Abort,
        }
    }
}

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl MqttConfig {
    /// Configured client id, or a random `fillsense-xxxxxxxx` one
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("fillsense-{}", &id[..8])
            }
        }
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

impl BridgeConfig {
    /// Load from `$FILLSENSE_CONFIG` or the OS config dir, then apply env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = match std::env::var_os(CONFIG_PATH_VAR) {
            Some(path) => PathBuf::from(path),
            None => Self::config_file_path()?,
        };

        let mut config = Self::from_file(&path)?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; a missing file yields the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Default config file location
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| ConfigError::Invalid("could not find config directory".to_string()))?;

        path.push("fillsense");
        path.push("bridge.toml");
        Ok(path)
    }

    /// Apply `FILLSENSE_*` overrides; `lookup` is `std::env::var` outside tests
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("FILLSENSE_ACCESS_TOKEN") {
            self.mqtt.access_token = token;
        }
        if let Some(host) = lookup("FILLSENSE_BROKER_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("FILLSENSE_BROKER_PORT") {
            self.mqtt.broker_port = parse_var("FILLSENSE_BROKER_PORT", port)?;
        }
        if let Some(port) = lookup("FILLSENSE_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(baud) = lookup("FILLSENSE_BAUD_RATE") {
            self.serial.baud_rate = parse_var("FILLSENSE_BAUD_RATE", baud)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.access_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.access_token is empty (set it in the config file or FILLSENSE_ACCESS_TOKEN)".to_string(),
            ));
        }
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker_host is empty".to_string()));
        }
        // rumqttc refuses anything shorter
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid("mqtt.keep_alive_secs must be at least 5".to_string()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".to_string()));
        }
        if self.bridge.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge.topic is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed: Result<T, _> = value.trim().parse();
    parsed.map_err(|_| ConfigError::Env { var, value })
}
