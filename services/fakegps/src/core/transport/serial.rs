//! SLCAN Serial Bridge Driver
//!
//! Drives a USB/serial CAN adapter speaking the SLCAN ASCII protocol through
//! `tokio-serial`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};
use uavcan_legacy::{CanDriver, CanFrame, DriverError};

use super::map_io_error;
use super::slcan::{self, LineDecoder, SlcanEvent};

/// How long a command waits for the adapter's `\r` / BEL reply during setup
const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// SLCAN adapter on a serial port
pub struct SlcanSerialDriver {
    device: String,
    port: Option<SerialStream>,
    decoder: LineDecoder,
    /// Frames that arrived while waiting for a command reply
    pending: VecDeque<CanFrame>,
}

impl fmt::Debug for SlcanSerialDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlcanSerialDriver")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SlcanSerialDriver {
    /// Open the serial port and bring the CAN channel up
    pub async fn open(device: &str, baud_rate: u32, bit_rate: u32) -> Result<Self, DriverError> {
        let bitrate_command = slcan::bitrate_command(bit_rate).ok_or_else(|| {
            DriverError::Unsupported(format!("No SLCAN preset for {bit_rate} bit/s"))
        })?;

        debug!("Opening serial port: {}", device);
        let port = tokio_serial::new(device, baud_rate)
            .open_native_async()
            .map_err(|e| {
                DriverError::Unavailable(format!("Failed to open serial port {device}: {e}"))
            })?;

        let mut driver = Self {
            device: device.to_string(),
            port: Some(port),
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
        };

        // Channel may still be open from a previous run; a refusal here is expected
        let _ = driver.command("C").await;
        for command in [bitrate_command, "O"] {
            if !driver.command(command).await? {
                return Err(DriverError::Unavailable(format!(
                    "SLCAN adapter on {device} rejected '{command}'"
                )));
            }
        }

        info!(
            "Opened SLCAN bridge on {} ({} baud, CAN {} bit/s)",
            device, baud_rate, bit_rate
        );
        Ok(driver)
    }

    fn port(&mut self) -> Result<&mut SerialStream, DriverError> {
        self.port.as_mut().ok_or(DriverError::Closed)
    }

    async fn write_line(&mut self, line: &[u8]) -> Result<(), DriverError> {
        let port = self.port()?;
        let write = async {
            port.write_all(line).await?;
            port.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        match timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result.map_err(map_io_error),
            Err(_) => Err(DriverError::QueueFull(format!(
                "serial write timed out after {WRITE_TIMEOUT:?}"
            ))),
        }
    }

    /// Send a setup command; `Ok(false)` if the adapter answered with BEL.
    /// Adapters that stay silent are treated as having accepted.
    async fn command(&mut self, command: &str) -> Result<bool, DriverError> {
        self.write_line(format!("{command}\r").as_bytes()).await?;

        let deadline = Instant::now() + COMMAND_REPLY_TIMEOUT;
        loop {
            while let Some(event) = self.decoder.next_event() {
                match event {
                    SlcanEvent::Ack => return Ok(true),
                    SlcanEvent::Error => return Ok(false),
                    SlcanEvent::Frame(frame) => self.pending.push_back(frame),
                    SlcanEvent::Malformed(line) => warn!("Malformed SLCAN line: {line}"),
                }
            }
            if !self.fill(Some(deadline)).await? {
                debug!("No reply to SLCAN command '{}'", command);
                return Ok(true);
            }
        }
    }

    /// Read more bytes into the decoder; `Ok(false)` when the deadline passed first
    async fn fill(&mut self, deadline: Option<Instant>) -> Result<bool, DriverError> {
        let mut buffer = [0u8; 256];
        let port = self.port()?;
        let read = match deadline {
            Some(deadline) => match timeout_at(deadline, port.read(&mut buffer)).await {
                Ok(read) => read,
                Err(_) => return Ok(false),
            },
            None => port.read(&mut buffer).await,
        };
        let count = read.map_err(map_io_error)?;
        if count == 0 {
            return Err(DriverError::Bus(format!(
                "serial port {} reached end of stream",
                self.device
            )));
        }
        self.decoder.push(&buffer[..count]);
        Ok(true)
    }
}

#[async_trait]
impl CanDriver for SlcanSerialDriver {
    fn name(&self) -> &str {
        &self.device
    }

    async fn send(&mut self, frame: &CanFrame) -> Result<(), DriverError> {
        let line = slcan::encode_frame(frame);
        self.write_line(line.as_bytes()).await
    }

    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<CanFrame>, DriverError> {
        if self.port.is_none() {
            return Err(DriverError::Closed);
        }
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let deadline = timeout.map(|wait| Instant::now() + wait);
        loop {
            while let Some(event) = self.decoder.next_event() {
                match event {
                    SlcanEvent::Frame(frame) => return Ok(Some(frame)),
                    SlcanEvent::Ack => {},
                    SlcanEvent::Error => {
                        return Err(DriverError::Bus(format!(
                            "SLCAN adapter on {} reported an error",
                            self.device
                        )))
                    },
                    SlcanEvent::Malformed(line) => warn!("Malformed SLCAN line: {line}"),
                }
            }
            if !self.fill(deadline).await? {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.port.is_none() {
            return Ok(());
        }
        if let Err(e) = self.write_line(b"C\r").await {
            debug!("Failed to close SLCAN channel on {}: {}", self.device, e);
        }
        // Serial port is closed when dropped
        self.port = None;
        self.pending.clear();
        info!("Closed serial port: {}", self.device);
        Ok(())
    }
}
