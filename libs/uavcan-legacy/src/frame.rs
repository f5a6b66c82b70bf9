//! CAN Frame Definition
//!
//! Classic CAN frames as exchanged between the stack and a driver.

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// CAN frame identifier type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanId {
    /// Standard 11-bit identifier
    Standard(u16),
    /// Extended 29-bit identifier
    Extended(u32),
}

impl CanId {
    /// Get the raw identifier value
    pub fn raw(&self) -> u32 {
        match self {
            CanId::Standard(id) => *id as u32,
            CanId::Extended(id) => *id,
        }
    }

    /// Check if this is an extended identifier
    pub fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

/// CAN frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// Frame identifier
    pub id: CanId,
    /// Frame data (0-8 bytes)
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Create a new CAN frame
    pub fn new(id: CanId, data: Vec<u8>) -> Result<Self, DriverError> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(DriverError::InvalidFrame(format!(
                "CAN frame data cannot exceed {MAX_DATA_LENGTH} bytes, got {}",
                data.len()
            )));
        }
        match id {
            CanId::Standard(raw) if raw > 0x7FF => Err(DriverError::InvalidFrame(format!(
                "Standard CAN ID cannot exceed 0x7FF, got 0x{raw:X}"
            ))),
            CanId::Extended(raw) if raw > 0x1FFF_FFFF => Err(DriverError::InvalidFrame(
                format!("Extended CAN ID cannot exceed 0x1FFFFFFF, got 0x{raw:X}"),
            )),
            _ => Ok(Self { id, data }),
        }
    }

    /// Create a new extended CAN frame
    pub fn new_extended(id: u32, data: Vec<u8>) -> Result<Self, DriverError> {
        Self::new(CanId::Extended(id), data)
    }

    /// Get data length code
    pub fn dlc(&self) -> u8 {
        self.data.len() as u8
    }

    /// Last data byte, which carries the UAVCAN tail byte
    pub fn tail(&self) -> Option<u8> {
        self.data.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = CanFrame::new_extended(0x1F04_242A, vec![1, 2, 3]).unwrap();
        assert!(frame.id.is_extended());
        assert_eq!(frame.id.raw(), 0x1F04_242A);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.tail(), Some(3));

        assert!(CanFrame::new_extended(0x2000_0000, vec![]).is_err());
        assert!(CanFrame::new(CanId::Standard(0x800), vec![]).is_err());
        assert!(CanFrame::new_extended(0x100, vec![0; 9]).is_err());
    }

    #[test]
    fn test_empty_frame_has_no_tail() {
        let frame = CanFrame::new(CanId::Standard(0x123), vec![]).unwrap();
        assert!(!frame.id.is_extended());
        assert_eq!(frame.tail(), None);
    }
}
