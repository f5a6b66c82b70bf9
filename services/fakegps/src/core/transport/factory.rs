//! Transport Factory
//!
//! Validates the user-facing transport settings into a `TransportConfig` and opens the
//! matching driver. Validation never touches a device.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uavcan_legacy::{CanDriver, DriverError};

use super::serial::SlcanSerialDriver;
use super::slcan;
use crate::error::{NodeError, Result};

/// Supported transport kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// SLCAN adapter on a serial port
    SerialBridge,
    /// Kernel CAN interface
    SocketCan,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::SerialBridge => write!(f, "serial"),
            TransportKind::SocketCan => write!(f, "can-slcan"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = NodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "serial" => Ok(TransportKind::SerialBridge),
            "can-slcan" => Ok(TransportKind::SocketCan),
            _ => Err(NodeError::config(format!(
                "Wrong CAN device type '{s}', expected 'serial' or 'can-slcan'"
            ))),
        }
    }
}

/// Raw transport settings as read from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// `serial` or `can-slcan`
    pub kind: String,
    /// Serial device path (serial)
    pub device: String,
    /// Serial port speed (serial)
    pub baud_rate: u32,
    /// CAN interface name (can-slcan)
    pub interface: String,
    /// Interface backend (can-slcan)
    pub bus_type: String,
    /// CAN bus bit rate
    pub bit_rate: u32,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: "serial".to_string(),
            device: "/dev/ttyACM0".to_string(),
            baud_rate: 1_000_000,
            interface: "slcan0".to_string(),
            bus_type: "socketcan".to_string(),
            bit_rate: 1_000_000,
        }
    }
}

impl TransportSettings {
    /// Check the selection and the fields it needs
    pub fn validate(&self) -> Result<TransportConfig> {
        match self.kind.parse::<TransportKind>()? {
            TransportKind::SerialBridge => {
                if self.device.is_empty() {
                    return Err(NodeError::config("Serial device path cannot be empty"));
                }
                if self.baud_rate == 0 {
                    return Err(NodeError::config("Baud rate must be greater than zero"));
                }
                if slcan::bitrate_command(self.bit_rate).is_none() {
                    return Err(NodeError::config(format!(
                        "CAN bit rate {} is not supported by SLCAN adapters",
                        self.bit_rate
                    )));
                }
                Ok(TransportConfig::SerialBridge {
                    device: self.device.clone(),
                    baud_rate: self.baud_rate,
                    bit_rate: self.bit_rate,
                })
            },
            TransportKind::SocketCan => {
                if self.interface.is_empty() {
                    return Err(NodeError::config("CAN interface name cannot be empty"));
                }
                if self.bus_type != "socketcan" {
                    return Err(NodeError::config(format!(
                        "Unsupported bus type '{}', only 'socketcan' is available",
                        self.bus_type
                    )));
                }
                if self.bit_rate == 0 {
                    return Err(NodeError::config("Bit rate must be greater than zero"));
                }
                Ok(TransportConfig::SocketCan {
                    interface: self.interface.clone(),
                    bus_type: self.bus_type.clone(),
                    bit_rate: self.bit_rate,
                })
            },
        }
    }
}

/// Validated transport selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    SerialBridge {
        device: String,
        baud_rate: u32,
        bit_rate: u32,
    },
    SocketCan {
        interface: String,
        bus_type: String,
        bit_rate: u32,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::SerialBridge { .. } => TransportKind::SerialBridge,
            TransportConfig::SocketCan { .. } => TransportKind::SocketCan,
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::SerialBridge {
                device, baud_rate, ..
            } => write!(f, "serial {device} @ {baud_rate} baud"),
            TransportConfig::SocketCan {
                interface,
                bus_type,
                bit_rate,
            } => write!(f, "{bus_type} {interface} @ {bit_rate} bit/s"),
        }
    }
}

/// Open the driver for a validated configuration
pub async fn open_transport(
    config: TransportConfig,
) -> std::result::Result<Box<dyn CanDriver>, DriverError> {
    debug!("Opening transport: {}", config);
    match config {
        TransportConfig::SerialBridge {
            device,
            baud_rate,
            bit_rate,
        } => {
            let driver = SlcanSerialDriver::open(&device, baud_rate, bit_rate).await?;
            Ok(Box::new(driver))
        },
        TransportConfig::SocketCan {
            interface,
            bit_rate,
            ..
        } => open_socketcan(&interface, bit_rate).await,
    }
}

#[cfg(all(target_os = "linux", feature = "can-linux"))]
async fn open_socketcan(
    interface: &str,
    bit_rate: u32,
) -> std::result::Result<Box<dyn CanDriver>, DriverError> {
    let driver = super::socketcan::SocketCanDriver::open(interface, bit_rate)?;
    Ok(Box::new(driver))
}

#[cfg(not(all(target_os = "linux", feature = "can-linux")))]
async fn open_socketcan(
    interface: &str,
    _bit_rate: u32,
) -> std::result::Result<Box<dyn CanDriver>, DriverError> {
    Err(DriverError::Unsupported(format!(
        "SocketCAN interface {interface} requires Linux and the 'can-linux' feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(
            "serial".parse::<TransportKind>().unwrap(),
            TransportKind::SerialBridge
        );
        assert_eq!(
            "can-slcan".parse::<TransportKind>().unwrap(),
            TransportKind::SocketCan
        );
        assert!(matches!(
            "usb".parse::<TransportKind>(),
            Err(NodeError::Config(_))
        ));
        assert_eq!(TransportKind::SocketCan.to_string(), "can-slcan");
    }

    #[test]
    fn test_reference_selections() {
        let serial = TransportSettings::default().validate().unwrap();
        assert_eq!(
            serial,
            TransportConfig::SerialBridge {
                device: "/dev/ttyACM0".to_string(),
                baud_rate: 1_000_000,
                bit_rate: 1_000_000,
            }
        );

        let socketcan = TransportSettings {
            kind: "can-slcan".to_string(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(socketcan.kind(), TransportKind::SocketCan);
        assert_eq!(socketcan.to_string(), "socketcan slcan0 @ 1000000 bit/s");
    }

    #[test]
    fn test_invalid_settings() {
        let cases = [
            TransportSettings {
                kind: "serial".to_string(),
                device: String::new(),
                ..Default::default()
            },
            TransportSettings {
                kind: "serial".to_string(),
                bit_rate: 42,
                ..Default::default()
            },
            TransportSettings {
                kind: "can-slcan".to_string(),
                bus_type: "pcan".to_string(),
                ..Default::default()
            },
            TransportSettings {
                kind: "SERIAL".to_string(),
                ..Default::default()
            },
        ];
        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(NodeError::Config(_))),
                "{settings:?} should be rejected"
            );
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "can-linux")))]
    #[tokio::test]
    async fn test_socketcan_unsupported_without_feature() {
        let config = TransportConfig::SocketCan {
            interface: "slcan0".to_string(),
            bus_type: "socketcan".to_string(),
            bit_rate: 1_000_000,
        };
        assert!(matches!(
            open_transport(config).await,
            Err(DriverError::Unsupported(_))
        ));
    }
}
