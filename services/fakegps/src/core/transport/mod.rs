//! Transport Bindings
//!
//! Concrete `CanDriver` implementations and the factory that picks one from the
//! validated transport configuration.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Protocol Stack (uavcan-legacy)               │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                CanDriver (Trait)                        │
//! │           send(), receive(), close()                    │
//! └─────────────────────────────────────────────────────────┘
//!                   │                       │
//!                   ▼                       ▼
//!         ┌───────────────────┐   ┌───────────────────┐
//!         │  SLCAN over       │   │    SocketCAN      │
//!         │  serial port      │   │  (Linux only)     │
//!         └───────────────────┘   └───────────────────┘
//! ```

pub mod factory;
pub mod serial;
pub mod slcan;

// SocketCAN is only available on Linux
#[cfg(all(target_os = "linux", feature = "can-linux"))]
pub mod socketcan;

pub use factory::{open_transport, TransportConfig, TransportKind, TransportSettings};
pub use serial::SlcanSerialDriver;

use std::io;
use uavcan_legacy::DriverError;

/// ENOBUFS: the kernel or adapter transmit queue is full
const ENOBUFS: i32 = 105;

/// Classify an I/O error raised while the link is up
pub(crate) fn map_io_error(error: io::Error) -> DriverError {
    if error.raw_os_error() == Some(ENOBUFS) || error.kind() == io::ErrorKind::WouldBlock {
        return DriverError::QueueFull(error.to_string());
    }
    DriverError::Bus(error.to_string())
}
