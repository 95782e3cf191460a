//! Fillsense Bridge - serial fullness sensor to MQTT telemetry
//!
//! Startup order: settle delay, MQTT session (the access token is the
//! username), serial port, then the read loop until Ctrl-C.

use std::time::Duration;

use anyhow::{Context, Result};
use fillsense_bridge::{Bridge, BridgeConfig, MqttSession, SerialLines, TelemetrySink};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fillsense_bridge=info")),
        )
        .init();

    info!("Fillsense bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::load().context("Failed to load configuration")?;

    tokio::time::sleep(Duration::from_millis(config.bridge.startup_delay_ms)).await;

    let mut session = MqttSession::connect(&config.mqtt)
        .await
        .context("Failed to connect to MQTT broker")?;

    let lines = match SerialLines::open(&config.serial) {
        Ok(lines) => lines,
        Err(e) => {
            if let Err(close_err) = session.close().await {
                warn!("Failed to close MQTT session: {}", close_err);
            }
            return Err(e).context("Failed to open serial port");
        }
    };

    let summary = Bridge::new(&config.bridge, lines, session)
        .serve(shutdown_signal())
        .await
        .context("Bridge execution failed")?;

    info!("Bridge stopped: {:?}", summary.stop);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
