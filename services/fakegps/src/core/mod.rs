//! Core service plumbing: startup helpers and CAN transports

pub mod bootstrap;
pub mod transport;
