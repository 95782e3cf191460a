//! Fillsense Bridge - serial fullness sensor to MQTT telemetry
//!
//! Reads quasi-JSON readings from the sensor's serial port, turns the raw
//! `fullness` distance into a 0-100 percentage and publishes each record as
//! JSON to a telemetry topic at QoS 1.

pub mod bridge;
pub mod config;
pub mod error;
pub mod fullness;
pub mod mqtt;
pub mod record;
pub mod serial;

pub use bridge::{Bridge, LineStats, RunSummary, StopReason};
pub use config::{BridgeConfig, InvalidReadingPolicy};
pub use error::{BridgeError, ConfigError, DecodeError, ReadingError};
pub use mqtt::{MqttSession, TelemetrySink};
pub use serial::SerialLines;
