//! Shared service plumbing
//!
//! Provides the pieces every service binary needs before it does any real work:
//! - logging functions
//! - layered configuration loading
//! - command-line bootstrap arguments
//! - graceful shutdown handling

pub mod bootstrap_args;
pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};

// Re-export common dependencies
pub use tokio;
pub use tokio_util;

// Re-export CLI dependencies when cli feature is enabled
#[cfg(feature = "cli")]
pub use clap;

// Re-export clap derive macros separately for proper macro resolution
#[cfg(feature = "cli")]
pub use clap::{Args, Parser};
