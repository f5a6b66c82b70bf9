//! Mock CAN Driver for Testing
//!
//! In-memory driver that records transmitted frames, replays queued inbound frames and
//! injects scripted failures. Clones share state, so a test can keep a handle after
//! moving the driver into a stack.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::CanDriver;
use crate::error::DriverError;
use crate::frame::CanFrame;

/// Mock driver state
#[derive(Debug, Default)]
struct MockDriverState {
    /// Inbound frames (or receive errors) in delivery order
    receive_queue: VecDeque<Result<CanFrame, DriverError>>,
    /// Errors returned by the next `send` calls, one per call
    send_failures: VecDeque<DriverError>,
    /// History of transmitted frames
    sent_frames: Vec<CanFrame>,
    /// Number of `close` calls
    close_calls: u32,
    closed: bool,
}

/// Mock driver implementation
#[derive(Debug, Clone)]
pub struct MockDriver {
    name: String,
    state: Arc<RwLock<MockDriverState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new("mock0")
    }
}

impl MockDriver {
    /// Create new mock driver
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(RwLock::new(MockDriverState::default())),
        }
    }

    /// Queue a frame for reception
    pub async fn push_frame(&self, frame: CanFrame) {
        self.state.write().await.receive_queue.push_back(Ok(frame));
    }

    /// Queue several frames for reception
    pub async fn push_frames(&self, frames: impl IntoIterator<Item = CanFrame>) {
        let mut state = self.state.write().await;
        state.receive_queue.extend(frames.into_iter().map(Ok));
    }

    /// Queue a receive error, delivered in order with queued frames
    pub async fn push_receive_error(&self, error: DriverError) {
        self.state.write().await.receive_queue.push_back(Err(error));
    }

    /// Make the next `send` call fail with `error`
    pub async fn fail_next_send(&self, error: DriverError) {
        self.state.write().await.send_failures.push_back(error);
    }

    /// All frames transmitted so far
    pub async fn sent_frames(&self) -> Vec<CanFrame> {
        self.state.read().await.sent_frames.clone()
    }

    /// Clear transmit history
    pub async fn clear_sent_frames(&self) {
        self.state.write().await.sent_frames.clear();
    }

    /// Number of times `close` was called
    pub async fn close_calls(&self) -> u32 {
        self.state.read().await.close_calls
    }

    /// Whether the driver has been closed
    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }
}

#[async_trait]
impl CanDriver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, frame: &CanFrame) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(DriverError::Closed);
        }
        if let Some(error) = state.send_failures.pop_front() {
            debug!("Mock driver failing send: {}", error);
            return Err(error);
        }
        state.sent_frames.push(frame.clone());
        Ok(())
    }

    async fn receive(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<CanFrame>, DriverError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(DriverError::Closed);
        }
        if let Some(next) = state.receive_queue.pop_front() {
            return next.map(Some);
        }
        drop(state);

        // Nothing queued: behave like an idle bus
        match timeout {
            Some(wait) if wait.is_zero() => {},
            Some(wait) => tokio::time::sleep(wait).await,
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_driver_send_receive() {
        let mut driver = MockDriver::default();
        let handle = driver.clone();

        let frame = CanFrame::new_extended(0x100, vec![0xC0]).unwrap();
        driver.send(&frame).await.unwrap();
        assert_eq!(handle.sent_frames().await, vec![frame.clone()]);

        handle.push_frame(frame.clone()).await;
        let received = driver.receive(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(received, Some(frame));
        assert_eq!(driver.receive(Some(Duration::ZERO)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_driver_scripted_failures() {
        let mut driver = MockDriver::default();
        driver
            .fail_next_send(DriverError::Bus("no ack".to_string()))
            .await;
        driver
            .push_receive_error(DriverError::Bus("bus off".to_string()))
            .await;

        let frame = CanFrame::new_extended(0x100, vec![0xC0]).unwrap();
        assert!(matches!(
            driver.send(&frame).await,
            Err(DriverError::Bus(_))
        ));
        assert!(driver.send(&frame).await.is_ok());
        assert!(matches!(
            driver.receive(Some(Duration::ZERO)).await,
            Err(DriverError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_driver_close() {
        let mut driver = MockDriver::default();
        driver.close().await.unwrap();
        driver.close().await.unwrap();
        assert!(driver.is_closed().await);
        assert_eq!(driver.close_calls().await, 2);

        let frame = CanFrame::new_extended(0x100, vec![0xC0]).unwrap();
        assert!(matches!(
            driver.send(&frame).await,
            Err(DriverError::Closed)
        ));
    }
}
