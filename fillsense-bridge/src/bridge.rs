//! The read -> normalize -> publish loop
//!
//! `Bridge` owns both long-lived resources: the serial reader and the telemetry
//! sink. `serve` always closes them before returning, whether the loop ended
//! on interrupt, on end of stream or on a fatal error.

use std::fmt;
use std::future::Future;

use rumqttc::QoS;
use tracing::{debug, error, info, warn};

use crate::config::{BehaviourConfig, InvalidReadingPolicy};
use crate::error::BridgeError;
use crate::fullness::normalize;
use crate::mqtt::TelemetrySink;
use crate::record::{decode_line, encode_record};
use crate::serial::{SerialEvent, SerialLines, MAX_LINE_LEN};

/// Printed for every line that does not decode
pub const DECODE_FAILURE_MESSAGE: &str = "Error: Invalid or empty JSON string received.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal fired
    Interrupted,
    /// The serial stream ended
    SourceClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub published: u64,
    /// Lines that did not decode or ran past `MAX_LINE_LEN`
    pub discarded: u64,
    /// Decoded records skipped by `InvalidReadingPolicy::Skip`
    pub rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub stop: StopReason,
    pub stats: LineStats,
}

pub struct Bridge<S> {
    lines: SerialLines,
    sink: S,
    topic: String,
    qos: QoS,
    policy: InvalidReadingPolicy,
    stats: LineStats,
}

impl<S: TelemetrySink> Bridge<S> {
    pub fn new(config: &BehaviourConfig, lines: SerialLines, sink: S) -> Self {
        Self {
            lines,
            sink,
            topic: config.topic.clone(),
            qos: config.qos.into(),
            policy: config.invalid_reading,
            stats: LineStats::default(),
        }
    }

    /// Run until `shutdown` resolves, the stream ends or a fatal error occurs,
    /// then release both connections
    pub async fn serve<F>(mut self, shutdown: F) -> Result<RunSummary, BridgeError>
    where
        F: Future<Output = ()>,
    {
        let result = self.run(shutdown).await;
        if let Err(e) = &result {
            error!("Bridge stopped on error: {}", e);
        }

        info!(
            "Published {} readings, discarded {} lines, rejected {} readings",
            self.stats.published, self.stats.discarded, self.stats.rejected
        );
        self.close().await;

        result.map(|stop| RunSummary {
            stop,
            stats: self.stats,
        })
    }

    async fn run<F>(&mut self, shutdown: F) -> Result<StopReason, BridgeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Forwarding readings to {}", self.topic);

        loop {
            // A publish stuck on a full request queue must not hold off shutdown.
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Disconnected");
                    return Ok(StopReason::Interrupted);
                }
                step = self.step() => {
                    if let Some(stop) = step? {
                        return Ok(stop);
                    }
                }
            }
        }
    }

    /// Wait for one serial event and act on it
    async fn step(&mut self) -> Result<Option<StopReason>, BridgeError> {
        match self.lines.next().await? {
            SerialEvent::Line(raw) => self.handle_line(&raw).await?,
            SerialEvent::Overlong => {
                self.discard(format_args!("line longer than {} bytes", MAX_LINE_LEN))
            }
            SerialEvent::Idle => info!("No reading from serial port before read timeout"),
            SerialEvent::Closed => {
                warn!("Serial stream closed");
                return Ok(Some(StopReason::SourceClosed));
            }
        }
        Ok(None)
    }

    /// Decode, normalize and publish one raw line.
    ///
    /// Only errors that must stop the bridge are returned.
    pub async fn handle_line(&mut self, raw: &[u8]) -> Result<(), BridgeError> {
        let record = match decode_line(raw) {
            Ok(record) => record,
            Err(e) => {
                self.discard(format_args!("{:?}: {}", String::from_utf8_lossy(raw), e));
                return Ok(());
            }
        };

        let record = match normalize(record) {
            Ok(record) => record,
            Err(e) => match self.policy {
                InvalidReadingPolicy::Abort => return Err(e.into()),
                InvalidReadingPolicy::Skip => {
                    warn!("Skipping reading: {}", e);
                    self.stats.rejected += 1;
                    return Ok(());
                }
            },
        };

        let payload = encode_record(&record)?;
        let text = String::from_utf8_lossy(&payload).into_owned();
        self.sink.publish(&self.topic, self.qos, payload).await?;
        info!("Sent data: {}", text);
        self.stats.published += 1;
        Ok(())
    }

    fn discard(&mut self, detail: fmt::Arguments<'_>) {
        warn!("{}", DECODE_FAILURE_MESSAGE);
        debug!("Discarded {}", detail);
        self.stats.discarded += 1;
    }

    pub fn stats(&self) -> LineStats {
        self.stats
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            warn!("Failed to close telemetry sink: {}", e);
        }
        // Dropping `lines` with `self` stops the reader thread and frees the port.
    }
}
