//! Transfer Layer
//!
//! Maps message transfers onto CAN frames and back:
//!
//! ```text
//! Message CAN ID:   | priority (5) | data type id (16) | 0 | source node (7) |
//! Service CAN ID:   | priority (5) | type (8) | req (1) | dest (7) | 1 | source (7) |
//! Frame data:       | payload (0-7)                      | tail byte         |
//! Tail byte:        | start | end | toggle | transfer id (5)                 |
//! ```
//!
//! Payloads longer than 7 bytes are split over several frames; the first frame then
//! starts with a 16-bit transfer CRC (CRC-16-CCITT-FALSE seeded with the data type
//! signature), little-endian.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

use crate::error::StackError;

/// Payload bytes per classic CAN frame (one byte is taken by the tail byte)
pub const FRAME_PAYLOAD: usize = 7;

/// Upper bound for a reassembled transfer
pub const MAX_TRANSFER_LENGTH: usize = 1024;

const SERVICE_NOT_MESSAGE: u32 = 1 << 7;

/// Node identifier, 1..=127 (0 is reserved for anonymous nodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 127;

    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN && value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value).ok_or_else(|| {
            format!(
                "Node ID must be within {}..={}, got {value}",
                NodeId::MIN,
                NodeId::MAX
            )
        })
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer priority, 0 (highest) ..= 31 (lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const HIGH: Priority = Priority(8);
    pub const MEDIUM: Priority = Priority(16);
    pub const LOW: Priority = Priority(24);
    pub const LOWEST: Priority = Priority(31);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= 31 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::LOWEST
    }
}

/// 5-bit rolling transfer counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransferId(u8);

impl TransferId {
    const MASK: u8 = 0x1F;

    pub fn from_truncating(value: u8) -> Self {
        Self(value & Self::MASK)
    }

    pub fn next(self) -> Self {
        Self::from_truncating(self.0.wrapping_add(1))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// CRC-16-CCITT-FALSE used for multi-frame transfers
#[derive(Debug, Clone, Copy)]
pub struct TransferCrc(u16);

impl Default for TransferCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl TransferCrc {
    const INIT_VALUE: u16 = 0xFFFF;
    const POLYNOMIAL: u16 = 0x1021;

    /// CRC pre-seeded with the data type signature
    pub fn with_signature(signature: u64) -> Self {
        let mut crc = Self::default();
        crc.add_bytes(&signature.to_le_bytes());
        crc
    }

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

/// Last byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailByte(u8);

impl TailByte {
    const START_OF_TRANSFER: u8 = 7;
    const END_OF_TRANSFER: u8 = 6;
    const TOGGLE_BIT: u8 = 5;

    pub fn new(sot: bool, eot: bool, toggle: bool, transfer_id: TransferId) -> Self {
        Self(
            (sot as u8) << Self::START_OF_TRANSFER
                | (eot as u8) << Self::END_OF_TRANSFER
                | (toggle as u8) << Self::TOGGLE_BIT
                | transfer_id.get(),
        )
    }

    pub fn sot(&self) -> bool {
        (self.0 >> Self::START_OF_TRANSFER) & 0x1 != 0
    }

    pub fn eot(&self) -> bool {
        (self.0 >> Self::END_OF_TRANSFER) & 0x1 != 0
    }

    pub fn toggle(&self) -> bool {
        (self.0 >> Self::TOGGLE_BIT) & 0x1 != 0
    }

    pub fn transfer_id(&self) -> TransferId {
        TransferId::from_truncating(self.0)
    }
}

impl From<u8> for TailByte {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<TailByte> for u8 {
    fn from(value: TailByte) -> Self {
        value.0
    }
}

/// Fields carried by a message frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub priority: Priority,
    pub data_type_id: u16,
    pub source: NodeId,
}

impl MessageHeader {
    /// Compose the 29-bit CAN identifier
    pub fn can_id(&self) -> u32 {
        u32::from(self.priority.get()) << 24
            | u32::from(self.data_type_id) << 8
            | u32::from(self.source.get())
    }

    /// Parse a CAN identifier; service frames and anonymous messages yield `None`
    pub fn parse(can_id: u32) -> Option<Self> {
        if can_id & SERVICE_NOT_MESSAGE != 0 {
            return None;
        }
        let source = NodeId::new((can_id & 0x7F) as u8)?;
        Some(Self {
            priority: Priority::from_raw((can_id >> 24) as u8),
            data_type_id: (can_id >> 8) as u16,
            source,
        })
    }
}

/// Fields carried by a service frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHeader {
    pub priority: Priority,
    pub service_type_id: u8,
    /// `true` for a request, `false` for a response
    pub request: bool,
    pub destination: NodeId,
    pub source: NodeId,
}

impl ServiceHeader {
    const REQUEST_NOT_RESPONSE: u32 = 1 << 15;

    pub fn can_id(&self) -> u32 {
        let request = if self.request {
            Self::REQUEST_NOT_RESPONSE
        } else {
            0
        };
        u32::from(self.priority.get()) << 24
            | u32::from(self.service_type_id) << 16
            | request
            | u32::from(self.destination.get()) << 8
            | SERVICE_NOT_MESSAGE
            | u32::from(self.source.get())
    }

    /// Parse a CAN identifier; message frames yield `None`
    pub fn parse(can_id: u32) -> Option<Self> {
        if can_id & SERVICE_NOT_MESSAGE == 0 {
            return None;
        }
        Some(Self {
            priority: Priority::from_raw((can_id >> 24) as u8),
            service_type_id: (can_id >> 16) as u8,
            request: can_id & Self::REQUEST_NOT_RESPONSE != 0,
            destination: NodeId::new(((can_id >> 8) & 0x7F) as u8)?,
            source: NodeId::new((can_id & 0x7F) as u8)?,
        })
    }
}

impl Priority {
    fn from_raw(value: u8) -> Self {
        Self(value & 0x1F)
    }
}

/// Split a serialized payload into frame data blocks (tail bytes included)
pub fn segment(payload: &[u8], signature: u64, transfer_id: TransferId) -> Vec<Vec<u8>> {
    if payload.len() <= FRAME_PAYLOAD {
        let mut data = payload.to_vec();
        data.push(TailByte::new(true, true, false, transfer_id).into());
        return vec![data];
    }

    let mut crc = TransferCrc::with_signature(signature);
    crc.add_bytes(payload);

    let mut buffer = Vec::with_capacity(payload.len() + 2);
    buffer.extend_from_slice(&crc.get().to_le_bytes());
    buffer.extend_from_slice(payload);

    let chunk_count = buffer.len().div_ceil(FRAME_PAYLOAD);
    buffer
        .chunks(FRAME_PAYLOAD)
        .enumerate()
        .map(|(index, chunk)| {
            let mut data = chunk.to_vec();
            let tail = TailByte::new(
                index == 0,
                index + 1 == chunk_count,
                index % 2 == 1,
                transfer_id,
            );
            data.push(tail.into());
            data
        })
        .collect()
}

/// A complete inbound message transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedTransfer {
    pub header: MessageHeader,
    pub transfer_id: TransferId,
    pub payload: Vec<u8>,
}

/// A complete inbound service request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedService {
    pub header: ServiceHeader,
    pub transfer_id: TransferId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SessionKind {
    Message,
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SessionKey {
    source: NodeId,
    data_type_id: u16,
    kind: SessionKind,
}

#[derive(Debug)]
struct RxSession {
    transfer_id: TransferId,
    next_toggle: bool,
    buffer: Vec<u8>,
}

/// Multi-frame reassembly, one session per (source, data type, transfer kind)
#[derive(Debug, Default)]
pub struct Reassembler {
    sessions: HashMap<SessionKey, RxSession>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transfers currently being reassembled
    pub fn pending(&self) -> usize {
        self.sessions.len()
    }

    /// Feed one message frame; returns the transfer once its last frame arrived
    pub fn accept(
        &mut self,
        header: MessageHeader,
        data: &[u8],
        signature: u64,
    ) -> Result<Option<ReceivedTransfer>, StackError> {
        let key = SessionKey {
            source: header.source,
            data_type_id: header.data_type_id,
            kind: SessionKind::Message,
        };
        Ok(self
            .accept_frame(key, data, signature)?
            .map(|(transfer_id, payload)| ReceivedTransfer {
                header,
                transfer_id,
                payload,
            }))
    }

    /// Feed one service frame
    pub fn accept_service(
        &mut self,
        header: ServiceHeader,
        data: &[u8],
        signature: u64,
    ) -> Result<Option<ReceivedService>, StackError> {
        let key = SessionKey {
            source: header.source,
            data_type_id: u16::from(header.service_type_id),
            kind: if header.request {
                SessionKind::Request
            } else {
                SessionKind::Response
            },
        };
        Ok(self
            .accept_frame(key, data, signature)?
            .map(|(transfer_id, payload)| ReceivedService {
                header,
                transfer_id,
                payload,
            }))
    }

    fn accept_frame(
        &mut self,
        key: SessionKey,
        data: &[u8],
        signature: u64,
    ) -> Result<Option<(TransferId, Vec<u8>)>, StackError> {
        let Some((&tail, body)) = data.split_last() else {
            return Err(StackError::transfer("frame without tail byte"));
        };
        let tail = TailByte::from(tail);

        if tail.sot() && tail.eot() {
            self.sessions.remove(&key);
            return Ok(Some((tail.transfer_id(), body.to_vec())));
        }

        if tail.sot() {
            if body.len() < 2 {
                return Err(StackError::transfer(format!(
                    "start frame from node {} too short to hold the transfer CRC",
                    key.source
                )));
            }
            if self.sessions.contains_key(&key) {
                trace!(
                    "Restarting incomplete transfer from node {} (type {})",
                    key.source,
                    key.data_type_id
                );
            }
            self.sessions.insert(
                key,
                RxSession {
                    transfer_id: tail.transfer_id(),
                    next_toggle: !tail.toggle(),
                    buffer: body.to_vec(),
                },
            );
            return Ok(None);
        }

        let Some(session) = self.sessions.get_mut(&key) else {
            return Err(StackError::transfer(format!(
                "frame from node {} (type {}) without start of transfer",
                key.source, key.data_type_id
            )));
        };

        if tail.transfer_id() != session.transfer_id {
            self.sessions.remove(&key);
            return Err(StackError::transfer(format!(
                "unexpected transfer id from node {}",
                key.source
            )));
        }
        if tail.toggle() != session.next_toggle {
            self.sessions.remove(&key);
            return Err(StackError::transfer(format!(
                "toggle bit mismatch from node {}",
                key.source
            )));
        }
        if session.buffer.len() + body.len() > MAX_TRANSFER_LENGTH + 2 {
            self.sessions.remove(&key);
            return Err(StackError::transfer(format!(
                "transfer from node {} exceeds {MAX_TRANSFER_LENGTH} bytes",
                key.source
            )));
        }

        session.buffer.extend_from_slice(body);
        session.next_toggle = !session.next_toggle;
        if !tail.eot() {
            return Ok(None);
        }

        let Some(session) = self.sessions.remove(&key) else {
            return Ok(None);
        };
        let expected = u16::from_le_bytes([session.buffer[0], session.buffer[1]]);
        let payload = session.buffer[2..].to_vec();
        let mut crc = TransferCrc::with_signature(signature);
        crc.add_bytes(&payload);
        if crc.get() != expected {
            return Err(StackError::transfer(format!(
                "transfer CRC mismatch from node {}: expected 0x{expected:04X}, computed 0x{:04X}",
                key.source,
                crc.get()
            )));
        }

        Ok(Some((session.transfer_id, payload)))
    }
}
