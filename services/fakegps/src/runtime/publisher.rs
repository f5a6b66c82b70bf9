//! Periodic publisher loop
//!
//! Each cycle spins the node first, so inbound traffic is drained and the TX queue is
//! flushed, then broadcasts the fix.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uavcan_legacy::{Fix, Priority, ProtocolStack};

use crate::config::PublisherSettings;
use crate::error::Result;
use crate::node::{Communicator, ErrorCounters, SpinPeriod};

/// Cadence of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSchedule {
    pub spin_period: SpinPeriod,
    pub priority: Priority,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
}

impl PublishSchedule {
    pub fn from_settings(settings: &PublisherSettings) -> Result<Self> {
        Ok(Self {
            spin_period: settings.spin_period()?,
            priority: settings.priority()?,
            max_cycles: settings.max_cycles,
        })
    }
}

/// Outcome of an orderly stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherReport {
    pub cycles: u64,
    pub counters: ErrorCounters,
}

/// Spin then publish `fix` until cancelled, the cycle limit is hit, or an
/// unclassified error escapes the node
pub async fn run_publisher<S: ProtocolStack>(
    node: &mut Communicator<S>,
    fix: &Fix,
    schedule: &PublishSchedule,
    cancel: &CancellationToken,
) -> Result<PublisherReport> {
    let mut cycles: u64 = 0;

    loop {
        if schedule.max_cycles.is_some_and(|max| cycles >= max) {
            debug!("Publisher reached {} cycles", cycles);
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            spun = node.spin(schedule.spin_period) => spun?,
        }

        node.publish(fix, schedule.priority).await?;
        cycles += 1;
        info!("GPS has been published");
    }

    let report = PublisherReport {
        cycles,
        counters: node.error_counters(),
    };
    info!(
        "Publisher stopped after {} cycles ({:?})",
        report.cycles, report.counters
    );
    Ok(report)
}
