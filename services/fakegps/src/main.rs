//! Fake GPS node binary

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use uavcan_legacy::{Event, NodeStatus};

use fakegps::core::bootstrap::{self, Args};
use fakegps::core::transport::open_transport;
use fakegps::runtime::{
    connect_with_retry, run_publisher, PublishSchedule, ReconnectError, RetryPolicy,
};
use fakegps::{gps, Communicator, NodeError};

fn log_node_status(event: &Event<NodeStatus>) -> anyhow::Result<()> {
    let status = &event.message;
    info!(
        "NodeStatus from node {}: uptime {}s, health {}, mode {}, sub mode {}, vendor code 0x{:04X}",
        event.source_node_id,
        status.uptime_sec,
        status.health,
        status.mode,
        status.sub_mode,
        status.vendor_specific_status_code
    );
    Ok(())
}

fn is_config_error(error: &anyhow::Error) -> bool {
    match error.downcast_ref::<ReconnectError>() {
        Some(ReconnectError::Fatal(inner)) => matches!(inner, NodeError::Config(_)),
        _ => matches!(error.downcast_ref::<NodeError>(), Some(NodeError::Config(_))),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings =
        bootstrap::load_settings(args.service.config.as_deref(), args.transport.as_deref())?;
    if args.service.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let identity = settings.node.identity()?;
    let fix = gps::fix_from_settings(&settings.publisher)?;
    let schedule = PublishSchedule::from_settings(&settings.publisher)?;
    let policy = RetryPolicy::from_settings(&settings.retry);
    let cancel = common::shutdown::shutdown_token();

    let connected = connect_with_retry(
        || {
            Communicator::open(
                &settings.transport,
                identity.clone(),
                &settings.stack,
                open_transport,
            )
        },
        &policy,
        &cancel,
    )
    .await;
    let mut node = match connected {
        Ok(node) => node,
        Err(ReconnectError::Cancelled) => {
            info!("Shutdown requested before the node came up");
            return Ok(());
        },
        Err(e) => return Err(e.into()),
    };

    node.subscribe::<NodeStatus, _>(log_node_status)?;
    let outcome = run_publisher(&mut node, &fix, &schedule, &cancel).await;
    node.close().await;

    let report = outcome?;
    info!("Stopped after {} cycles", report.cycles);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = bootstrap::initialize_logging(&args.service) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        },
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if is_config_error(&e) {
                error!("Fatal configuration error: {:#}", e);
            } else {
                error!("fakegps terminated: {:#}", e);
            }
            ExitCode::FAILURE
        },
    }
}
