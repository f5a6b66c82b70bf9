//! Service Bootstrap and Initialization
//!
//! Command-line parsing, logging setup and configuration loading. Uses the common
//! bootstrap utilities for everything that is not specific to the fake GPS node.

use clap::Parser;
use std::path::Path;
use tracing::debug;

pub use common::bootstrap_args::ServiceArgs;

use crate::config::Settings;
use crate::error::{NodeError, Result};

/// Service name used for logging targets and the env prefix
pub const SERVICE_NAME: &str = "fakegps";

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "FAKEGPS_";

/// Command-line arguments for fakegps
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fakegps",
    version = env!("CARGO_PKG_VERSION"),
    about = "Fake GNSS node broadcasting a fixed position on a UAVCAN v0 bus",
    long_about = None
)]
pub struct Args {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Override the transport kind (serial, can-slcan)
    #[arg(short = 't', long)]
    pub transport: Option<String>,
}

/// Initialize logging from the command-line flags
pub fn initialize_logging(args: &ServiceArgs) -> Result<()> {
    let log_config = args.log_config(SERVICE_NAME);
    common::logging::init_logging(&log_config)
        .map_err(|e| NodeError::config(format!("Failed to init logging: {e}")))
}

/// Load settings from defaults, the optional file and `FAKEGPS_*` variables, then
/// apply command-line overrides
pub fn load_settings(config_file: Option<&Path>, transport: Option<&str>) -> Result<Settings> {
    let mut settings: Settings = common::config_loader::load_config(config_file, ENV_PREFIX)?;
    if let Some(kind) = transport {
        debug!("Transport kind overridden from command line: {}", kind);
        settings.transport.kind = kind.to_string();
    }
    settings.validate()?;
    Ok(settings)
}
