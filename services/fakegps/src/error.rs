//! Error handling for the fake GPS node
//!
//! `NodeError` is what the communicator hands back to its caller. Transient bus and
//! queue conditions never show up here; they are counted and logged where they occur.

use thiserror::Error;
use uavcan_legacy::{DriverError, StackError};

/// Node-level error type
#[derive(Error, Debug)]
pub enum NodeError {
    /// Invalid settings; never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport device or interface could not be opened
    #[error("{0}")]
    Acquisition(DriverError),

    /// Failure raised by the protocol stack that is not a classified soft error
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Operation on a communicator that has been closed
    #[error("Communicator is closed")]
    Closed,
}

/// Result type alias for the node
pub type Result<T> = std::result::Result<T, NodeError>;

impl NodeError {
    pub fn config(msg: impl Into<String>) -> Self {
        NodeError::Config(msg.into())
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_acquisition(&self) -> bool {
        matches!(self, NodeError::Acquisition(_))
    }
}

impl From<common::Error> for NodeError {
    fn from(err: common::Error) -> Self {
        NodeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_classification() {
        let error = NodeError::Acquisition(DriverError::Unavailable(
            "/dev/ttyACM0: No such file or directory".to_string(),
        ));
        assert!(error.is_acquisition());
        assert!(error.to_string().contains("/dev/ttyACM0"));

        assert!(!NodeError::config("bad kind").is_acquisition());
        assert!(!NodeError::Closed.is_acquisition());
    }

    #[test]
    fn test_stack_error_is_transparent() {
        let error: NodeError = StackError::transfer("CRC mismatch").into();
        assert_eq!(error.to_string(), "Transfer error: CRC mismatch");
    }
}
