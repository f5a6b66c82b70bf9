//! Protocol Stack
//!
//! Ties the transfer layer, the DSDL codec and a `CanDriver` together:
//!
//! - `broadcast` serializes a message, splits it into frames and pushes them through a
//!   bounded TX queue
//! - `spin` queues the periodic NodeStatus heartbeat, flushes the TX queue, then
//!   receives frames, reassembles transfers and dispatches them to handlers
//! - handlers run synchronously inside `spin`, in registration order
//! - `GetNodeInfo` requests addressed to this node are answered from `StackConfig::node_info`
//!
//! The stack does no retrying of its own: every failure surfaces to the caller, which
//! decides what is transient. Transmit failures inside `spin` are held back until the
//! receive side has run for the whole period, so a congested bus never starves inbound
//! traffic.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::driver::CanDriver;
use crate::error::{DriverError, Result, StackError};
use crate::frame::CanFrame;
use crate::messages::{
    GetNodeInfo, GetNodeInfoResponse, HardwareVersion, Health, Message, Mode, NodeStatus,
    SoftwareVersion,
};
use crate::transfer::{
    segment, MessageHeader, NodeId, Priority, ReceivedTransfer, Reassembler, ServiceHeader,
    TransferId,
};

/// A decoded inbound message with its transfer metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Event<M> {
    pub message: M,
    pub source_node_id: NodeId,
    pub priority: Priority,
    pub transfer_id: TransferId,
}

/// Token returned by `add_handler`, used to remove the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What this node reports about itself in `GetNodeInfo` responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub software_version: SoftwareVersion,
    pub hardware_version: HardwareVersion,
}

/// Stack parameters
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub node_id: NodeId,
    /// Maximum number of frames waiting for the driver
    pub tx_queue_capacity: usize,
    /// NodeStatus broadcast period; zero disables the heartbeat
    pub status_interval: Duration,
    pub status_priority: Priority,
    /// `None` leaves `GetNodeInfo` requests unanswered
    pub node_info: Option<NodeInfo>,
}

impl StackConfig {
    pub const DEFAULT_TX_QUEUE_CAPACITY: usize = 512;

    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            tx_queue_capacity: Self::DEFAULT_TX_QUEUE_CAPACITY,
            status_interval: Duration::from_secs(1),
            status_priority: Priority::LOW,
            node_info: None,
        }
    }
}

/// Operations a node needs from a protocol stack
#[async_trait]
pub trait ProtocolStack: Send {
    fn node_id(&self) -> NodeId;

    /// Serialize and queue a message for transmission, then flush what the driver accepts
    async fn broadcast<M: Message>(&mut self, message: &M, priority: Priority) -> Result<()>;

    /// Register a callback for every received message of type `M`
    fn add_handler<M, F>(&mut self, handler: F) -> HandlerId
    where
        M: Message,
        F: FnMut(&Event<M>) -> anyhow::Result<()> + Send + 'static;

    fn remove_handler(&mut self, id: HandlerId) -> bool;

    /// Process pending I/O
    ///
    /// * `None` - block until at least one transfer was dispatched, then drain
    /// * `Some(Duration::ZERO)` - drain what is already available
    /// * `Some(t)` - process traffic for `t`, then return
    ///
    /// A transmit failure does not cut the call short; the first one is returned after
    /// the receive side has finished.
    async fn spin(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Release the driver; later calls are no-ops
    async fn close(&mut self) -> Result<()>;
}

type ErasedHandler = Box<dyn FnMut(&ReceivedTransfer) -> Result<()> + Send>;

struct HandlerEntry {
    id: HandlerId,
    data_type_id: u16,
    signature: u64,
    callback: ErasedHandler,
}

#[derive(Debug)]
struct PendingResponse {
    header: ServiceHeader,
    transfer_id: TransferId,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct TxEntry {
    frame: CanFrame,
    /// Frames of one transfer share a sequence number
    sequence: u64,
}

/// UAVCAN v0 stack over a CAN driver
pub struct Stack<D: CanDriver> {
    driver: D,
    config: StackConfig,
    tx_queue: VecDeque<TxEntry>,
    tx_sequence: u64,
    transfer_ids: HashMap<u16, TransferId>,
    reassembler: Reassembler,
    handlers: Vec<HandlerEntry>,
    next_handler_id: u64,
    started_at: Instant,
    next_status_at: Instant,
    closed: bool,
}

impl<D: CanDriver> fmt::Debug for Stack<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("driver", &self.driver)
            .field("config", &self.config)
            .field("tx_pending", &self.tx_queue.len())
            .field("handlers", &self.handlers.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<D: CanDriver> Stack<D> {
    pub fn new(driver: D, config: StackConfig) -> Self {
        let now = Instant::now();
        debug!(
            "Protocol stack started on {} as node {}",
            driver.name(),
            config.node_id
        );
        Self {
            driver,
            config,
            tx_queue: VecDeque::new(),
            tx_sequence: 0,
            transfer_ids: HashMap::new(),
            reassembler: Reassembler::new(),
            handlers: Vec::new(),
            next_handler_id: 0,
            started_at: now,
            next_status_at: now,
            closed: false,
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Frames waiting for the driver
    pub fn tx_pending(&self) -> usize {
        self.tx_queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StackError::Closed)
        } else {
            Ok(())
        }
    }

    fn enqueue<M: Message>(&mut self, message: &M, priority: Priority) -> Result<()> {
        let payload = message.to_bytes()?;
        let transfer_id = self
            .transfer_ids
            .get(&M::DATA_TYPE_ID)
            .copied()
            .unwrap_or_default();
        let can_id = MessageHeader {
            priority,
            data_type_id: M::DATA_TYPE_ID,
            source: self.config.node_id,
        }
        .can_id();

        self.enqueue_transfer(
            can_id,
            &payload,
            M::DATA_TYPE_SIGNATURE,
            transfer_id,
            M::FULL_NAME,
        )?;
        self.transfer_ids.insert(M::DATA_TYPE_ID, transfer_id.next());
        Ok(())
    }

    fn enqueue_transfer(
        &mut self,
        can_id: u32,
        payload: &[u8],
        signature: u64,
        transfer_id: TransferId,
        name: &str,
    ) -> Result<()> {
        let blocks = segment(payload, signature, transfer_id);
        if self.tx_queue.len() + blocks.len() > self.config.tx_queue_capacity {
            return Err(StackError::TxQueueFull(format!(
                "{} needs {} frames, {} of {} slots in use",
                name,
                blocks.len(),
                self.tx_queue.len(),
                self.config.tx_queue_capacity
            )));
        }

        let frames = blocks
            .into_iter()
            .map(|data| CanFrame::new_extended(can_id, data))
            .collect::<std::result::Result<Vec<_>, DriverError>>()?;

        let sequence = self.tx_sequence;
        self.tx_sequence = self.tx_sequence.wrapping_add(1);
        trace!(
            "Queued {} ({} frames, transfer id {})",
            name,
            frames.len(),
            transfer_id.get()
        );
        self.tx_queue
            .extend(frames.into_iter().map(|frame| TxEntry { frame, sequence }));
        Ok(())
    }

    /// Hand queued frames to the driver until it refuses one
    async fn flush(&mut self) -> Result<()> {
        while let Some(entry) = self.tx_queue.front() {
            match self.driver.send(&entry.frame).await {
                Ok(()) => {
                    self.tx_queue.pop_front();
                },
                Err(DriverError::QueueFull(reason)) => {
                    // Frame stays queued for the next flush
                    return Err(DriverError::QueueFull(reason).into());
                },
                Err(error) => {
                    let sequence = entry.sequence;
                    let before = self.tx_queue.len();
                    self.tx_queue.retain(|pending| pending.sequence != sequence);
                    debug!(
                        "Dropped {} frames of a transfer after send failure",
                        before - self.tx_queue.len()
                    );
                    return Err(error.into());
                },
            }
        }
        Ok(())
    }

    fn current_status(&self, now: Instant) -> NodeStatus {
        NodeStatus {
            uptime_sec: now.duration_since(self.started_at).as_secs() as u32,
            health: Health::Ok,
            mode: Mode::Operational,
            sub_mode: 0,
            vendor_specific_status_code: 0,
        }
    }

    /// Queue a NodeStatus when one is due; sent by the next flush
    fn queue_heartbeat(&mut self) -> Result<()> {
        if self.config.status_interval.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        if now < self.next_status_at {
            return Ok(());
        }
        while self.next_status_at <= now {
            self.next_status_at += self.config.status_interval;
        }

        let status = self.current_status(now);
        self.enqueue(&status, self.config.status_priority)
    }

    /// Build the reply to a service request addressed to this node, if it is one we serve
    fn serve_request(
        &mut self,
        header: ServiceHeader,
        data: &[u8],
    ) -> Result<Option<PendingResponse>> {
        if !header.request
            || header.destination != self.config.node_id
            || header.service_type_id != GetNodeInfo::SERVICE_TYPE_ID
            || self.config.node_info.is_none()
        {
            return Ok(None);
        }
        let Some(request) =
            self.reassembler
                .accept_service(header, data, GetNodeInfo::DATA_TYPE_SIGNATURE)?
        else {
            return Ok(None);
        };

        let status = self.current_status(Instant::now());
        let Some(info) = &self.config.node_info else {
            return Ok(None);
        };
        let response = GetNodeInfoResponse {
            status,
            software_version: info.software_version,
            hardware_version: info.hardware_version.clone(),
            name: info.name.clone(),
        };
        debug!(
            "Answering {} from node {}",
            GetNodeInfo::FULL_NAME,
            header.source
        );
        Ok(Some(PendingResponse {
            header: ServiceHeader {
                request: false,
                destination: header.source,
                source: self.config.node_id,
                ..header
            },
            transfer_id: request.transfer_id,
            payload: response.to_bytes()?,
        }))
    }

    async fn send_response(&mut self, response: PendingResponse) -> Result<()> {
        self.enqueue_transfer(
            response.header.can_id(),
            &response.payload,
            GetNodeInfo::DATA_TYPE_SIGNATURE,
            response.transfer_id,
            GetNodeInfo::FULL_NAME,
        )?;
        self.flush().await
    }

    /// Feed one frame to the reassembler; returns the number of handlers invoked
    fn handle_frame(&mut self, frame: CanFrame) -> Result<usize> {
        if !frame.id.is_extended() {
            return Ok(0);
        }
        let Some(header) = MessageHeader::parse(frame.id.raw()) else {
            return Ok(0);
        };
        if header.source == self.config.node_id {
            return Ok(0);
        }
        let Some(signature) = self
            .handlers
            .iter()
            .find(|entry| entry.data_type_id == header.data_type_id)
            .map(|entry| entry.signature)
        else {
            return Ok(0);
        };

        let Some(transfer) = self.reassembler.accept(header, &frame.data, signature)? else {
            return Ok(0);
        };

        let mut invoked = 0;
        for entry in self
            .handlers
            .iter_mut()
            .filter(|entry| entry.data_type_id == header.data_type_id)
        {
            (entry.callback)(&transfer)?;
            invoked += 1;
        }
        Ok(invoked)
    }
}

#[async_trait]
impl<D: CanDriver> ProtocolStack for Stack<D> {
    fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    async fn broadcast<M: Message>(&mut self, message: &M, priority: Priority) -> Result<()> {
        self.ensure_open()?;
        self.enqueue(message, priority)?;
        self.flush().await
    }

    fn add_handler<M, F>(&mut self, mut handler: F) -> HandlerId
    where
        M: Message,
        F: FnMut(&Event<M>) -> anyhow::Result<()> + Send + 'static,
    {
        let id = HandlerId(self.next_handler_id);
        self.next_handler_id += 1;

        let callback: ErasedHandler = Box::new(move |transfer: &ReceivedTransfer| {
            let event = Event {
                message: M::from_bytes(&transfer.payload)?,
                source_node_id: transfer.header.source,
                priority: transfer.header.priority,
                transfer_id: transfer.transfer_id,
            };
            handler(&event).map_err(|source| StackError::Handler {
                data_type: M::FULL_NAME,
                source,
            })
        });

        self.handlers.push(HandlerEntry {
            id,
            data_type_id: M::DATA_TYPE_ID,
            signature: M::DATA_TYPE_SIGNATURE,
            callback,
        });
        debug!("Handler {} registered for {}", id.0, M::FULL_NAME);
        id
    }

    fn remove_handler(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|entry| entry.id != id);
        before != self.handlers.len()
    }

    async fn spin(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        // First transmit failure of this call, reported once receiving is done
        let mut tx_error = self.queue_heartbeat().err();
        if let Err(error) = self.flush().await {
            tx_error.get_or_insert(error);
        }

        let deadline = timeout
            .filter(|period| !period.is_zero())
            .map(|period| Instant::now() + period);
        let mut dispatched = 0usize;

        loop {
            let wait = match (timeout, deadline) {
                (None, _) if dispatched == 0 => None,
                (None, _) => Some(Duration::ZERO),
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    Some(deadline - now)
                },
                (Some(_), None) => Some(Duration::ZERO),
            };

            let Some(frame) = self.driver.receive(wait).await? else {
                if wait.is_none() {
                    continue;
                }
                break;
            };
            let service = ServiceHeader::parse(frame.id.raw()).filter(|_| frame.id.is_extended());
            match service {
                Some(header) => {
                    if let Some(response) = self.serve_request(header, &frame.data)? {
                        if let Err(error) = self.send_response(response).await {
                            tx_error.get_or_insert(error);
                        }
                    }
                },
                None => dispatched += self.handle_frame(frame)?,
            }
        }

        match tx_error {
            Some(error) => {
                debug!("Transmit failure during spin: {}", error);
                Err(error)
            },
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tx_queue.clear();
        self.handlers.clear();
        self.reassembler = Reassembler::new();
        debug!("Closing protocol stack on {}", self.driver.name());
        self.driver.close().await?;
        Ok(())
    }
}
