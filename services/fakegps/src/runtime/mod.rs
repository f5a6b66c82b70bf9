//! Runtime drivers
//!
//! `reconnect` brings the communicator up, retrying while the device is missing;
//! `publisher` then runs the spin/publish loop until shutdown.

pub mod publisher;
pub mod reconnect;

pub use publisher::{run_publisher, PublishSchedule, PublisherReport};
pub use reconnect::{connect_with_retry, ReconnectError, RetryPolicy};
