//! Fake GPS Node
//!
//! A UAVCAN v0 (DroneCAN) node that broadcasts a fixed `uavcan.equipment.gnss.Fix`
//! on a CAN bus and logs the `NodeStatus` heartbeats of its peers.
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ connect_with_    │───►│   Communicator   │◄───│  run_publisher   │
//! │ retry            │    │  (node wrapper)  │    │  spin → publish  │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//!                                  │
//!                                  ▼
//!                     ┌──────────────────────────┐
//!                     │ uavcan-legacy Stack      │
//!                     │ over SLCAN / SocketCAN   │
//!                     └──────────────────────────┘
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod gps;
pub mod node;
pub mod runtime;

pub use config::Settings;
pub use error::{NodeError, Result};
pub use node::{
    Communicator, ErrorCounters, NodeIdentity, NodeState, SpinPeriod, SubscriptionHandle,
};

// Message types and event metadata callers need for subscriptions
pub use uavcan_legacy::{Event, Fix, NodeStatus, Priority, SoftwareVersion};
