//! CAN Driver Interface
//!
//! The seam between the protocol stack and a physical or virtual CAN link. A driver
//! is handed over to the stack already opened; acquisition (and its failure modes)
//! belongs to whoever constructs the driver.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::DriverError;
use crate::frame::CanFrame;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockDriver;

/// Frame-level link used by the stack
#[async_trait]
pub trait CanDriver: Send + fmt::Debug {
    /// Human-readable interface name, used in logs
    fn name(&self) -> &str;

    /// Transmit one frame
    ///
    /// `DriverError::QueueFull` means the frame was not accepted and may be retried
    /// later; any other error means the frame is lost.
    async fn send(&mut self, frame: &CanFrame) -> Result<(), DriverError>;

    /// Receive one frame
    ///
    /// * `None` timeout - wait until a frame arrives
    /// * `Some(Duration::ZERO)` - poll without blocking
    /// * `Some(t)` - wait at most `t`
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive(&mut self, timeout: Option<Duration>)
        -> Result<Option<CanFrame>, DriverError>;

    /// Release the underlying device. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Allows `Box<dyn CanDriver>` to be used where `CanDriver` is required
#[async_trait]
impl CanDriver for Box<dyn CanDriver> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn send(&mut self, frame: &CanFrame) -> Result<(), DriverError> {
        self.as_mut().send(frame).await
    }

    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<CanFrame>, DriverError> {
        self.as_mut().receive(timeout).await
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.as_mut().close().await
    }
}
