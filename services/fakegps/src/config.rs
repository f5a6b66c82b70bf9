//! Service configuration
//!
//! Loaded through `common::config_loader`: compiled-in defaults, then an optional TOML
//! or YAML file, then `FAKEGPS_*` environment variables (`__` separates sections, e.g.
//! `FAKEGPS_TRANSPORT__DEVICE=/dev/ttyUSB0`).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uavcan_legacy::{GetNodeInfoResponse, NodeId, Priority, StackConfig};

use crate::core::transport::TransportSettings;
use crate::error::{NodeError, Result};
use crate::node::{NodeIdentity, SpinPeriod};

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub node: NodeSettings,
    pub transport: TransportSettings,
    pub retry: RetrySettings,
    pub publisher: PublisherSettings,
    pub stack: StackSettings,
}

impl Settings {
    /// Check every section; transport errors come first
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        self.node.validate()?;
        self.retry.validate()?;
        self.publisher.validate()?;
        self.stack.validate()?;
        Ok(())
    }
}

/// Node identity as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub node_id: u8,
    pub name: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            node_id: NodeIdentity::DEFAULT_NODE_ID,
            name: NodeIdentity::DEFAULT_NAME.to_string(),
        }
    }
}

impl NodeSettings {
    pub fn node_id(&self) -> Result<NodeId> {
        NodeId::new(self.node_id).ok_or_else(|| {
            NodeError::config(format!(
                "Node id {} out of range {}..={}",
                self.node_id,
                NodeId::MIN,
                NodeId::MAX
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        self.node_id()?;
        if self.name.len() > GetNodeInfoResponse::MAX_NAME_LEN {
            return Err(NodeError::config(format!(
                "Node name is {} bytes, at most {} allowed",
                self.name.len(),
                GetNodeInfoResponse::MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Identity with the configured id and name, library defaults for the rest
    pub fn identity(&self) -> Result<NodeIdentity> {
        self.validate()?;
        Ok(NodeIdentity::new(self.node_id()?, self.name.clone()))
    }
}

/// Reconnect behaviour while the transport cannot be acquired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// 0 retries forever
    pub max_attempts: u32,
    pub delay_secs: f64,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub max_delay_secs: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            delay_secs: 2.0,
            backoff_multiplier: 1.0,
            max_delay_secs: 60.0,
            jitter: false,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<()> {
        if !(self.delay_secs.is_finite() && self.delay_secs >= 0.0) {
            return Err(NodeError::config(format!(
                "Retry delay must be a non-negative number of seconds, got {}",
                self.delay_secs
            )));
        }
        if !(self.max_delay_secs.is_finite() && self.max_delay_secs >= self.delay_secs) {
            return Err(NodeError::config(
                "Retry max_delay_secs must be at least delay_secs",
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err(NodeError::config(format!(
                "Backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Publisher loop cadence and the fix it broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// -1 blocks, 0 polls, > 0 waits that many seconds
    pub spin_period_secs: f64,
    /// Transfer priority, 0 (highest) to 31 (lowest)
    pub priority: u8,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_msl_mm: i32,
    pub height_ellipsoid_mm: i32,
    pub ned_velocity: [f32; 3],
    pub sats_used: u8,
    /// 0 no fix, 1 time only, 2 2D, 3 3D
    pub status: u8,
    pub pdop: f32,
    /// Stop after this many cycles; unset runs until shutdown
    pub max_cycles: Option<u64>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            spin_period_secs: 0.2,
            priority: Priority::LOWEST.get(),
            latitude_deg: 55.754_442_6,
            longitude_deg: 48.742_684,
            height_msl_mm: -6500,
            height_ellipsoid_mm: 0,
            ned_velocity: [0.0; 3],
            sats_used: 10,
            status: 3,
            pdop: 99.0,
            max_cycles: None,
        }
    }
}

impl PublisherSettings {
    pub fn spin_period(&self) -> Result<SpinPeriod> {
        SpinPeriod::from_secs_f64(self.spin_period_secs)
    }

    pub fn priority(&self) -> Result<Priority> {
        Priority::new(self.priority).ok_or_else(|| {
            NodeError::config(format!("Priority {} out of range 0..=31", self.priority))
        })
    }

    fn validate(&self) -> Result<()> {
        self.spin_period()?;
        self.priority()?;
        crate::gps::fix_from_settings(self)?;
        Ok(())
    }
}

/// Protocol stack tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSettings {
    pub tx_queue_capacity: usize,
    /// NodeStatus heartbeat period; 0 disables it
    pub status_interval_secs: f64,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            tx_queue_capacity: StackConfig::DEFAULT_TX_QUEUE_CAPACITY,
            status_interval_secs: 1.0,
        }
    }
}

impl StackSettings {
    fn validate(&self) -> Result<()> {
        if self.tx_queue_capacity == 0 {
            return Err(NodeError::config("TX queue capacity must be greater than zero"));
        }
        if !(self.status_interval_secs.is_finite() && self.status_interval_secs >= 0.0) {
            return Err(NodeError::config(format!(
                "Status interval must be a non-negative number of seconds, got {}",
                self.status_interval_secs
            )));
        }
        Ok(())
    }

    /// Stack parameters for a node; the identity answers `GetNodeInfo`
    pub fn stack_config(&self, identity: &NodeIdentity) -> StackConfig {
        StackConfig {
            tx_queue_capacity: self.tx_queue_capacity,
            status_interval: Duration::try_from_secs_f64(self.status_interval_secs)
                .unwrap_or_default(),
            node_info: Some(identity.node_info()),
            ..StackConfig::new(identity.node_id)
        }
    }
}
