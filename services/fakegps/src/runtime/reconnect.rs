//! Communicator construction with retry
//!
//! Only transport acquisition failures are retried. Configuration and any other error
//! is returned on the first occurrence.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::RetrySettings;
use crate::error::NodeError;

/// Why the retry driver gave up
#[derive(Error, Debug)]
pub enum ReconnectError {
    /// Shutdown requested while connecting
    #[error("Reconnection cancelled")]
    Cancelled,

    /// Configured attempt bound reached
    #[error("Maximum reconnection attempts ({attempts}) exceeded: {last_error}")]
    MaxAttemptsExceeded {
        attempts: u32,
        last_error: NodeError,
    },

    /// Error that retrying cannot fix
    #[error(transparent)]
    Fatal(NodeError),
}

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    /// Spread delays by ±25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        let secs = |value: f64| Duration::try_from_secs_f64(value).unwrap_or_default();
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: secs(settings.delay_secs),
            max_delay: secs(settings.max_delay_secs),
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let mut delay = Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }
        delay
    }

    fn attempts_label(&self) -> String {
        if self.max_attempts == 0 {
            "∞".to_string()
        } else {
            self.max_attempts.to_string()
        }
    }
}

/// Run `connect` until it succeeds, retrying acquisition failures per `policy`
pub async fn connect_with_retry<T, F, Fut>(
    mut connect: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<T, ReconnectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ReconnectError::Cancelled);
        }
        attempt = attempt.saturating_add(1);
        debug!("Connection attempt {}/{}", attempt, policy.attempts_label());

        let error = match connect().await {
            Ok(connected) => {
                warn!("communicator has been successfully created");
                return Ok(connected);
            },
            Err(e) if e.is_acquisition() => e,
            Err(e) => return Err(ReconnectError::Fatal(e)),
        };

        if policy.max_attempts > 0 && attempt >= policy.max_attempts {
            error!(
                "{}. Giving up after {} attempts",
                error, attempt
            );
            return Err(ReconnectError::MaxAttemptsExceeded {
                attempts: attempt,
                last_error: error,
            });
        }

        error!("{}. Check your device. Trying to reconnect.", error);
        let delay = policy.delay_for(attempt);
        debug!("Waiting {:?} before reconnection attempt", delay);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use uavcan_legacy::DriverError;

    fn unavailable() -> NodeError {
        NodeError::Acquisition(DriverError::Unavailable(
            "/dev/ttyACM0: No such file or directory".to_string(),
        ))
    }

    fn fixed(delay_ms: u64, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(delay_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_default_policy_is_fixed_and_unbounded() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(50), Duration::from_secs(2));
        assert_eq!(policy.max_attempts, 0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(750) && delay <= Duration::from_millis(1250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let started = tokio::time::Instant::now();

        let result = connect_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.set(counter.get() + 1);
                    if counter.get() < 4 {
                        Err(unavailable())
                    } else {
                        Ok("node")
                    }
                }
            },
            &fixed(2000, 0),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap(), "node");
        assert_eq!(attempts.get(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_config_error_is_not_retried() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let result: Result<(), _> = connect_with_retry(
            || {
                counter.set(counter.get() + 1);
                async { Err(NodeError::config("Wrong CAN device type 'usb'")) }
            },
            &fixed(10, 0),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ReconnectError::Fatal(NodeError::Config(_)))
        ));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let attempts = Rc::new(Cell::new(0u32));
        let counter = attempts.clone();
        let result: Result<(), _> = connect_with_retry(
            || {
                counter.set(counter.get() + 1);
                async { Err(unavailable()) }
            },
            &fixed(100, 3),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            result,
            Err(ReconnectError::MaxAttemptsExceeded { attempts: 3, .. })
        ));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result: Result<(), _> =
            connect_with_retry(|| async { Err(unavailable()) }, &fixed(2000, 0), &cancel).await;
        assert!(matches!(result, Err(ReconnectError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            connect_with_retry(|| async { Ok(()) }, &RetryPolicy::default(), &cancel).await;
        assert!(matches!(result, Err(ReconnectError::Cancelled)));
    }
}
