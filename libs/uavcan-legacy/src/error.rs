//! Stack and Driver Error Types
//!
//! Two layers of errors: `DriverError` is raised by CAN drivers (the frame link),
//! `StackError` by the protocol stack on top of it. The split matters to callers,
//! which treat some of them as transient and recoverable.

use thiserror::Error;

/// Result type for stack operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Errors raised by a CAN driver
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The device or interface cannot be acquired (absent, permission denied, no such bus)
    #[error("Device unavailable: {0}")]
    Unavailable(String),

    /// Bus-level failure reported by the adapter or the OS
    #[error("Bus error: {0}")]
    Bus(String),

    /// The driver's own frame queue is at capacity
    #[error("Driver queue full: {0}")]
    QueueFull(String),

    /// Frame could not be represented on this link
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport kind not supported by this build
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Driver has been closed
    #[error("Driver closed")]
    Closed,
}

/// Errors raised by the protocol stack
#[derive(Debug, Error)]
pub enum StackError {
    /// Multi-frame reassembly or payload decoding failed
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Outgoing frame queue of the stack is at capacity
    #[error("TX queue full: {0}")]
    TxQueueFull(String),

    /// Error bubbled up from the CAN driver
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Message could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A subscriber callback failed
    #[error("Handler failed for {data_type}: {source:#}")]
    Handler {
        data_type: &'static str,
        source: anyhow::Error,
    },

    /// Stack has been closed
    #[error("Stack closed")]
    Closed,
}

impl StackError {
    pub fn transfer(msg: impl Into<String>) -> Self {
        StackError::Transfer(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        StackError::Encoding(msg.into())
    }

    /// Bus-level driver failure (send or receive)
    pub fn is_bus_error(&self) -> bool {
        matches!(self, StackError::Driver(DriverError::Bus(_)))
    }

    /// Queue-full condition at the driver level
    pub fn is_driver_queue_full(&self) -> bool {
        matches!(self, StackError::Driver(DriverError::QueueFull(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let error = DriverError::Unavailable("/dev/ttyACM0: No such file".to_string());
        assert!(error.to_string().contains("Device unavailable"));
        assert!(error.to_string().contains("/dev/ttyACM0"));
    }

    #[test]
    fn test_stack_error_classification() {
        let bus: StackError = DriverError::Bus("ack error".to_string()).into();
        assert!(bus.is_bus_error());
        assert!(!bus.is_driver_queue_full());

        let full: StackError = DriverError::QueueFull("tx".to_string()).into();
        assert!(full.is_driver_queue_full());
        assert!(!full.is_bus_error());

        assert!(!StackError::transfer("bad crc").is_bus_error());
    }

    #[test]
    fn test_handler_error_keeps_context() {
        let error = StackError::Handler {
            data_type: "uavcan.protocol.NodeStatus",
            source: anyhow::anyhow!("inner").context("outer"),
        };
        let text = error.to_string();
        assert!(text.contains("uavcan.protocol.NodeStatus"));
        assert!(text.contains("outer"));
        assert!(text.contains("inner"));
    }
}
