//! Error types for the bridge
//!
//! Line-level failures (`DecodeError`, `ReadingError`) are kept apart from
//! transport failures (`BridgeError`) so the main loop can decide which ones
//! it survives.

use thiserror::Error;

/// A serial line that could not be turned into a record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("line is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A decoded record whose `fullness` field cannot be normalized
#[derive(Debug, Error, PartialEq)]
pub enum ReadingError {
    #[error("record has no `fullness` field")]
    MissingFullness,

    #[error("`fullness` is not a number: {0}")]
    NotNumeric(String),
}

/// Transport and loop failures
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial read failed: {0}")]
    SerialRead(#[from] std::io::Error),

    #[error("MQTT connection failed: {0}")]
    MqttConnect(#[from] rumqttc::ConnectionError),

    #[error("broker refused connection: {0:?}")]
    MqttRefused(rumqttc::ConnectReturnCode),

    #[error("no CONNACK from broker within {0:?}")]
    MqttConnectTimeout(std::time::Duration),

    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid reading: {0}")]
    InvalidReading(#[from] ReadingError),
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
