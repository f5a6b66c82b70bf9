//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`{PREFIX}SECTION__KEY`)
//! 2. Configuration file (TOML or YAML, picked by extension)
//! 3. Compiled-in defaults

use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Build the figment for `T` without extracting it
pub fn layered_figment<T>(file: Option<&Path>, env_prefix: &str) -> Result<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;
        figment = match extension {
            "toml" => figment.merge(Toml::file(path)),
            "yaml" | "yml" => figment.merge(Yaml::file(path)),
            _ => {
                return Err(Error::Config(format!(
                    "Unsupported config file format: {extension}"
                )))
            },
        };
        debug!("Loading configuration from {}", path.display());
    }

    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load `T` from defaults, an optional file and prefixed environment variables
pub fn load_config<T>(file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    layered_figment::<T>(file, env_prefix)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))
}
