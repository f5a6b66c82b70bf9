//! UAVCAN Communicator
//!
//! Owns one protocol stack bound to one CAN transport and exposes the small surface
//! the service needs: `subscribe`, `publish`, `spin` and `close`.
//!
//! Transient transport conditions never escape `publish` or `spin`. They are
//! classified, counted and logged here:
//!
//! | Path    | Condition                        | Counter                |
//! |---------|----------------------------------|------------------------|
//! | publish | bus error from the driver        | `tx_can_errors`        |
//! | publish | stack TX queue full              | `tx_queue_full`        |
//! | publish | driver queue full                | logged only            |
//! | spin    | transfer (reassembly/decode)     | `spin_transfer_errors` |
//! | spin    | bus error from the driver        | `spin_can_errors`      |
//! | spin    | queue full (stack or driver)     | logged only            |
//!
//! Everything else, subscriber callback failures included, is returned to the caller.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uavcan_legacy::{
    CanDriver, DriverError, Event, HandlerId, HardwareVersion, Message, NodeId, NodeInfo,
    Priority, ProtocolStack, SoftwareVersion, Stack, StackError,
};

use crate::config::StackSettings;
use crate::core::transport::{open_transport, TransportConfig, TransportSettings};
use crate::error::{NodeError, Result};

/// Stack type used by the service binary
pub type DefaultStack = Stack<Box<dyn CanDriver>>;

/// Who this node is on the bus. Fixed for the lifetime of a communicator and reported
/// to peers that send `GetNodeInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: NodeId,
    pub name: String,
    pub software_version: SoftwareVersion,
    /// Zero padded to the 16 bytes carried on the wire
    pub hardware_unique_id: [u8; 16],
}

impl NodeIdentity {
    pub const DEFAULT_NODE_ID: u8 = 42;
    pub const DEFAULT_NAME: &'static str = "uavcan communicator";
    pub const DEFAULT_HARDWARE_ID: &'static [u8] = b"12345";
    pub const DEFAULT_SOFTWARE_VERSION: SoftwareVersion = SoftwareVersion::new(0, 2);

    pub fn new(node_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            node_id,
            name: name.into(),
            software_version: Self::DEFAULT_SOFTWARE_VERSION,
            hardware_unique_id: Self::pad_hardware_id(Self::DEFAULT_HARDWARE_ID),
        }
    }

    /// Contents of this node's `GetNodeInfo` response
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            name: self.name.clone(),
            software_version: self.software_version,
            hardware_version: HardwareVersion {
                unique_id: self.hardware_unique_id,
                ..Default::default()
            },
        }
    }

    /// Copy up to 16 bytes, zero filling the rest
    pub fn pad_hardware_id(bytes: &[u8]) -> [u8; 16] {
        let mut id = [0u8; 16];
        let len = bytes.len().min(id.len());
        id[..len].copy_from_slice(&bytes[..len]);
        id
    }
}

const DEFAULT_NODE: NodeId = match NodeId::new(NodeIdentity::DEFAULT_NODE_ID) {
    Some(id) => id,
    None => panic!("default node id out of range"),
};

impl Default for NodeIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_NODE, Self::DEFAULT_NAME)
    }
}

/// Lifecycle state of a communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Live,
    /// Terminal
    Closed,
}

/// Running totals of classified soft errors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounters {
    /// Bus errors raised while publishing
    pub tx_can_errors: u64,
    /// Publishes refused because the stack TX queue was full
    pub tx_queue_full: u64,
    /// Bus errors raised while spinning
    pub spin_can_errors: u64,
    /// Malformed or corrupted inbound transfers
    pub spin_transfer_errors: u64,
}

/// How long a `spin` call processes traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinPeriod {
    /// Wait for at least one inbound transfer
    Blocking,
    /// Only what is already available
    NonBlocking,
    Timeout(Duration),
}

impl SpinPeriod {
    /// Numeric form used in configuration: -1 blocks, 0 polls, a positive value waits
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if secs == -1.0 {
            return Ok(SpinPeriod::Blocking);
        }
        if secs == 0.0 {
            return Ok(SpinPeriod::NonBlocking);
        }
        if secs.is_finite() && secs > 0.0 {
            if let Ok(period) = Duration::try_from_secs_f64(secs) {
                return Ok(SpinPeriod::Timeout(period));
            }
        }
        Err(NodeError::config(format!(
            "Invalid spin period {secs}: use -1 (blocking), 0 (non-blocking) or a positive number of seconds"
        )))
    }

    fn as_timeout(self) -> Option<Duration> {
        match self {
            SpinPeriod::Blocking => None,
            SpinPeriod::NonBlocking => Some(Duration::ZERO),
            SpinPeriod::Timeout(period) => Some(period),
        }
    }
}

/// Handle of one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: HandlerId,
    data_type: &'static str,
}

impl SubscriptionHandle {
    pub fn data_type(&self) -> &'static str {
        self.data_type
    }
}

fn classify_open_error(error: DriverError) -> NodeError {
    match error {
        DriverError::Unsupported(reason) => NodeError::Config(reason),
        other => NodeError::Acquisition(other),
    }
}

/// Node wrapper around a protocol stack
pub struct Communicator<S: ProtocolStack = DefaultStack> {
    identity: NodeIdentity,
    stack: Option<S>,
    subscriptions: Vec<SubscriptionHandle>,
    counters: ErrorCounters,
}

impl<S: ProtocolStack> fmt::Debug for Communicator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("subscriptions", &self.subscriptions.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl Communicator {
    /// Validate the transport selection, open it and start a stack with default tuning
    pub async fn new(transport: &TransportSettings, identity: NodeIdentity) -> Result<Self> {
        Self::open(transport, identity, &StackSettings::default(), open_transport).await
    }
}

impl<D: CanDriver> Communicator<Stack<D>> {
    /// Build a communicator with a custom driver opener
    ///
    /// The selection is validated before `opener` runs, so an invalid kind never
    /// touches a device. Open failures come back as `NodeError::Acquisition`, except
    /// transports this build cannot provide, which are configuration errors.
    pub async fn open<F, Fut>(
        transport: &TransportSettings,
        identity: NodeIdentity,
        stack_settings: &StackSettings,
        opener: F,
    ) -> Result<Self>
    where
        F: FnOnce(TransportConfig) -> Fut,
        Fut: Future<Output = std::result::Result<D, DriverError>>,
    {
        let config = transport.validate()?;
        debug!("Opening {} for node {}", config, identity.node_id);

        let driver = opener(config).await.map_err(classify_open_error)?;
        let stack = Stack::new(driver, stack_settings.stack_config(&identity));
        Ok(Self::with_stack(identity, stack))
    }
}

impl<S: ProtocolStack> Communicator<S> {
    /// Wrap an already running stack
    pub fn with_stack(identity: NodeIdentity, stack: S) -> Self {
        if stack.node_id() != identity.node_id {
            warn!(
                "Stack runs as node {} but identity says {}",
                stack.node_id(),
                identity.node_id
            );
        }
        info!(
            "Node '{}' (id {}, sw {}) is up",
            identity.name, identity.node_id, identity.software_version
        );
        Self {
            identity,
            stack: Some(stack),
            subscriptions: Vec::new(),
            counters: ErrorCounters::default(),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn state(&self) -> NodeState {
        if self.stack.is_some() {
            NodeState::Live
        } else {
            NodeState::Closed
        }
    }

    pub fn error_counters(&self) -> ErrorCounters {
        self.counters
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// The underlying stack while live
    pub fn stack(&self) -> Option<&S> {
        self.stack.as_ref()
    }

    fn stack_mut(&mut self) -> Result<&mut S> {
        self.stack.as_mut().ok_or(NodeError::Closed)
    }

    /// Register `callback` for every inbound `M`
    ///
    /// Callbacks for one type run in registration order, synchronously inside `spin`.
    /// A callback error aborts that `spin` call.
    pub fn subscribe<M, F>(&mut self, callback: F) -> Result<SubscriptionHandle>
    where
        M: Message,
        F: FnMut(&Event<M>) -> anyhow::Result<()> + Send + 'static,
    {
        let id = self.stack_mut()?.add_handler::<M, F>(callback);
        let handle = SubscriptionHandle {
            id,
            data_type: M::FULL_NAME,
        };
        self.subscriptions.push(handle);
        debug!(
            "Subscribed to {} ({} subscriptions)",
            M::FULL_NAME,
            self.subscriptions.len()
        );
        Ok(handle)
    }

    /// Cancel one subscription; `false` if it was not registered
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let Some(stack) = self.stack.as_mut() else {
            return false;
        };
        if !stack.remove_handler(handle.id) {
            return false;
        }
        self.subscriptions.retain(|existing| *existing != handle);
        debug!("Unsubscribed from {}", handle.data_type);
        true
    }

    /// Broadcast `message`; transient send failures are counted and swallowed
    pub async fn publish<M: Message>(&mut self, message: &M, priority: Priority) -> Result<()> {
        let result = self.stack_mut()?.broadcast(message, priority).await;
        match result {
            Ok(()) => Ok(()),
            Err(StackError::Driver(DriverError::Bus(reason))) => {
                self.counters.tx_can_errors += 1;
                error!(
                    "CAN bus error while publishing {}: {} #{}",
                    M::FULL_NAME,
                    reason,
                    self.counters.tx_can_errors
                );
                Ok(())
            },
            Err(StackError::TxQueueFull(reason)) => {
                self.counters.tx_queue_full += 1;
                error!(
                    "TX queue full while publishing {}: {} #{}",
                    M::FULL_NAME,
                    reason,
                    self.counters.tx_queue_full
                );
                Ok(())
            },
            Err(StackError::Driver(DriverError::QueueFull(reason))) => {
                error!(
                    "Transport queue full while publishing {}: {}",
                    M::FULL_NAME,
                    reason
                );
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Broadcast at the lowest priority
    pub async fn publish_lowest<M: Message>(&mut self, message: &M) -> Result<()> {
        self.publish(message, Priority::LOWEST).await
    }

    /// Process pending I/O and dispatch inbound messages
    pub async fn spin(&mut self, period: SpinPeriod) -> Result<()> {
        let result = self.stack_mut()?.spin(period.as_timeout()).await;
        match result {
            Ok(()) => Ok(()),
            Err(StackError::Transfer(reason)) => {
                self.counters.spin_transfer_errors += 1;
                error!(
                    "Transfer error while spinning: {} #{}",
                    reason, self.counters.spin_transfer_errors
                );
                Ok(())
            },
            Err(StackError::Driver(DriverError::Bus(reason))) => {
                self.counters.spin_can_errors += 1;
                error!(
                    "CAN bus error while spinning: {} #{}",
                    reason, self.counters.spin_can_errors
                );
                Ok(())
            },
            Err(StackError::TxQueueFull(reason))
            | Err(StackError::Driver(DriverError::QueueFull(reason))) => {
                error!("Queue full while spinning: {}", reason);
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Release the transport; later calls do nothing
    pub async fn close(&mut self) {
        let Some(mut stack) = self.stack.take() else {
            return;
        };
        self.subscriptions.clear();
        if let Err(e) = stack.close().await {
            warn!("Error while closing the protocol stack: {}", e);
        }
        info!("Communicator closed (node {})", self.identity.node_id);
    }
}
