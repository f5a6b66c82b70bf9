//! Legacy UAVCAN (v0) communication library
//!
//! A deliberately small UAVCAN v0 / DroneCAN stack: enough to broadcast and receive
//! message transfers over a classic CAN link.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Application / Node                      │
//! │        broadcast(), add_handler(), spin()               │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              ProtocolStack (Stack)                      │
//! │  DSDL (de)serialization, segmentation, reassembly,      │
//! │  transfer CRC, TX queue, NodeStatus heartbeat           │
//! └─────────────────────────────────────────────────────────┘
//!                             │
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 CanDriver (Trait)                       │
//! │            send(), receive(), close()                   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Drivers for real interfaces (serial SLCAN bridges, SocketCAN) live with the
//! application; this crate only defines the seam and ships an in-memory mock behind
//! the `test-utils` feature.
//!
//! # Limitations
//!
//! - The only service served is `GetNodeInfo`; no service client side
//! - No dynamic node-ID allocation, no redundant interfaces
//! - Classic CAN only (8-byte MTU)

pub mod driver;
pub mod dsdl;
pub mod error;
pub mod frame;
pub mod messages;
pub mod stack;
pub mod transfer;

pub use driver::CanDriver;
pub use error::{DriverError, StackError};
pub use frame::{CanFrame, CanId};
pub use messages::{
    Fix, FixStatus, GetNodeInfo, GetNodeInfoResponse, HardwareVersion, Health, Message, Mode,
    NodeStatus, SoftwareVersion,
};
pub use stack::{Event, HandlerId, NodeInfo, ProtocolStack, Stack, StackConfig};
pub use transfer::{NodeId, Priority, ServiceHeader, TransferId};
