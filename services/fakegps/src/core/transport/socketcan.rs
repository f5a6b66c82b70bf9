//! SocketCAN Driver
//!
//! Kernel CAN interfaces (`can0`, `vcan0`, `slcan0` created by `slcand`). The bit rate
//! belongs to the interface and is set with `ip link`; it is only logged here.

use async_trait::async_trait;
use socketcan::tokio::CanSocket;
use socketcan::{CanFrame as SocketFrame, EmbeddedFrame, ExtendedId, Id, StandardId};
use std::fmt;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace};
use uavcan_legacy::{CanDriver, CanFrame, CanId, DriverError};

use super::map_io_error;

/// Async SocketCAN socket bound to one interface
pub struct SocketCanDriver {
    interface: String,
    socket: Option<CanSocket>,
}

impl fmt::Debug for SocketCanDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCanDriver")
            .field("interface", &self.interface)
            .field("open", &self.socket.is_some())
            .finish()
    }
}

impl SocketCanDriver {
    pub fn open(interface: &str, bit_rate: u32) -> Result<Self, DriverError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            DriverError::Unavailable(format!("Failed to open CAN interface {interface}: {e}"))
        })?;
        info!(
            "Opened SocketCAN interface {} (expected bit rate {} bit/s)",
            interface, bit_rate
        );
        Ok(Self {
            interface: interface.to_string(),
            socket: Some(socket),
        })
    }

    fn to_socket_frame(frame: &CanFrame) -> Result<SocketFrame, DriverError> {
        let id = match frame.id {
            CanId::Extended(raw) => ExtendedId::new(raw).map(Id::Extended),
            CanId::Standard(raw) => StandardId::new(raw).map(Id::Standard),
        }
        .ok_or_else(|| {
            DriverError::InvalidFrame(format!("identifier 0x{:X} out of range", frame.id.raw()))
        })?;
        SocketFrame::new(id, &frame.data).ok_or_else(|| {
            DriverError::InvalidFrame(format!("{} data bytes do not fit", frame.data.len()))
        })
    }

    fn from_socket_frame(frame: &SocketFrame) -> Result<CanFrame, DriverError> {
        let id = match frame.id() {
            Id::Extended(id) => CanId::Extended(id.as_raw()),
            Id::Standard(id) => CanId::Standard(id.as_raw()),
        };
        CanFrame::new(id, frame.data().to_vec())
    }
}

#[async_trait]
impl CanDriver for SocketCanDriver {
    fn name(&self) -> &str {
        &self.interface
    }

    async fn send(&mut self, frame: &CanFrame) -> Result<(), DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::Closed)?;
        let frame = Self::to_socket_frame(frame)?;
        socket.write_frame(frame).await.map_err(map_io_error)
    }

    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<CanFrame>, DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::Closed)?;
        let deadline = timeout.map(|wait| Instant::now() + wait);

        loop {
            let read = match deadline {
                Some(deadline) => match timeout_at(deadline, socket.read_frame()).await {
                    Ok(read) => read,
                    Err(_) => return Ok(None),
                },
                None => socket.read_frame().await,
            };

            let frame = read.map_err(map_io_error)?;
            match frame {
                SocketFrame::Data(_) => return Self::from_socket_frame(&frame).map(Some),
                SocketFrame::Remote(_) => {
                    trace!("Ignoring remote frame on {}", self.interface);
                },
                SocketFrame::Error(_) => {
                    return Err(DriverError::Bus(format!(
                        "error frame received on {}",
                        self.interface
                    )))
                },
            }
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.socket.take().is_some() {
            debug!("Closed SocketCAN interface {}", self.interface);
        }
        Ok(())
    }
}
