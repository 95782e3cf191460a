//! Serial side of the bridge
//!
//! Reads are blocking, so the port lives on its own thread. That thread hands
//! complete lines to the async loop through a channel of capacity one. The
//! reader stays at most one line ahead of the loop and never buffers more.
//!
//! Without a configured read timeout, waiting for a line is unbounded. The
//! port is still opened with a short internal timeout (`POLL_INTERVAL`), so the
//! thread can notice that the bridge has gone away and close the port. With a
//! read timeout, each expiry is forwarded to the loop as `SerialEvent::Idle`.

use std::io::{self, BufRead, BufReader, Read};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::error::BridgeError;

/// Wake-up interval of a reader with no read timeout
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest line kept, terminator included
pub const MAX_LINE_LEN: usize = 4096;

/// What the reader thread hands to the loop
#[derive(Debug, PartialEq, Eq)]
pub enum SerialEvent {
    /// One raw line, terminator included
    Line(Vec<u8>),
    /// A line ran past `MAX_LINE_LEN` and was dropped
    Overlong,
    /// The read timeout expired without a complete line
    Idle,
    /// End of stream
    Closed,
}

/// Open the configured port as 8N1 without flow control
pub fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>, BridgeError> {
    let timeout = config.read_timeout().unwrap_or(POLL_INTERVAL);
    info!(
        "Opening serial port {} at {} baud",
        config.port, config.baud_rate
    );

    serialport::new(config.port.as_str(), config.baud_rate)
        .timeout(timeout)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .open()
        .map_err(|source| BridgeError::SerialOpen {
            port: config.port.clone(),
            source,
        })
}

/// Outcome of one `LineReader::read_line` call
#[derive(Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Line(Vec<u8>),
    Overlong,
    TimedOut,
    Eof,
}

/// Newline framing over a byte stream that may time out mid-line.
///
/// Bytes read before a timeout are kept and completed by later reads. A line
/// that outgrows `MAX_LINE_LEN` is reported once as `Overlong`, and the rest of
/// it is skipped up to the next `\n`.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    skipping: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            skipping: false,
        }
    }

    pub fn read_line(&mut self) -> io::Result<ReadStatus> {
        loop {
            let room = (MAX_LINE_LEN - self.pending.len()) as u64;
            match (&mut self.reader).take(room).read_until(b'\n', &mut self.pending) {
                Ok(0) if self.pending.is_empty() => return Ok(ReadStatus::Eof),
                Ok(_) if self.pending.len() >= MAX_LINE_LEN && !self.pending.ends_with(b"\n") => {
                    self.pending.clear();
                    if !std::mem::replace(&mut self.skipping, true) {
                        return Ok(ReadStatus::Overlong);
                    }
                }
                // A trailing line without terminator is still a line.
                Ok(_) => {
                    let line = std::mem::take(&mut self.pending);
                    if !std::mem::replace(&mut self.skipping, false) {
                        return Ok(ReadStatus::Line(line));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(ReadStatus::TimedOut),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Receiving end of the reader thread
pub struct SerialLines {
    rx: mpsc::Receiver<io::Result<SerialEvent>>,
}

impl SerialLines {
    /// Open the configured port and start reading it
    pub fn open(config: &SerialConfig) -> Result<Self, BridgeError> {
        let port = open_port(config)?;
        Self::spawn(port, config.read_timeout().is_some())
    }

    /// Start a reader thread over any byte source.
    ///
    /// `report_idle` forwards timeouts as `SerialEvent::Idle`; otherwise they
    /// are only used to check whether the receiver is still alive.
    pub fn spawn<R>(source: R, report_idle: bool) -> Result<Self, BridgeError>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_loop(LineReader::new(source), tx, report_idle))?;
        Ok(Self { rx })
    }

    /// Wait for the next event; cancel-safe
    pub async fn next(&mut self) -> Result<SerialEvent, BridgeError> {
        match self.rx.recv().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(e)) => Err(BridgeError::SerialRead(e)),
            None => Ok(SerialEvent::Closed),
        }
    }
}

fn read_loop<R: Read>(
    mut lines: LineReader<R>,
    tx: mpsc::Sender<io::Result<SerialEvent>>,
    report_idle: bool,
) {
    loop {
        let event = match lines.read_line() {
            Ok(ReadStatus::Line(line)) => Ok(SerialEvent::Line(line)),
            Ok(ReadStatus::Overlong) => Ok(SerialEvent::Overlong),
            Ok(ReadStatus::TimedOut) if report_idle => Ok(SerialEvent::Idle),
            Ok(ReadStatus::TimedOut) => {
                if tx.is_closed() {
                    break;
                }
                continue;
            }
            Ok(ReadStatus::Eof) => Ok(SerialEvent::Closed),
            Err(e) => Err(e),
        };

        let last = matches!(event, Ok(SerialEvent::Closed) | Err(_));
        if tx.blocking_send(event).is_err() || last {
            break;
        }
    }
    // The port is dropped with `lines`.
    debug!("Serial reader stopped");
}
