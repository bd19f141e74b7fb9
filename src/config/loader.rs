//! Configuration Loader
//!
//! Layers built-in defaults, an optional configuration file and `DELEGATION__*`
//! environment variables through the `config` crate, then validates the result.

use super::DelegationConfig;
use crate::error::{DelegationError, Result};
use std::env;
use std::path::PathBuf;
use tracing::debug;

const ENV_PREFIX: &str = "DELEGATION";
const ENV_SEPARATOR: &str = "__";
const CONFIG_PATH_VAR: &str = "DELEGATION_CONFIG_PATH";
const DEFAULT_CONFIG_BASENAME: &str = "config/delegation";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Explicit file path; `None` falls back to `DELEGATION_CONFIG_PATH` or
    /// `config/delegation.{toml,yaml,json}`
    path: Option<PathBuf>,
    use_file: bool,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            use_file: true,
            use_env: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn without_file(mut self) -> Self {
        self.use_file = false;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn load(&self) -> Result<DelegationConfig> {
        let defaults = config::Config::try_from(&DelegationConfig::default())
            .map_err(|e| DelegationError::Configuration(format!("Invalid defaults: {e}")))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if self.use_file {
            match self.resolve_path() {
                Some(path) => {
                    debug!(path = %path.display(), "Loading delegation configuration file");
                    builder = builder.add_source(config::File::from(path).required(true));
                }
                None => {
                    builder = builder
                        .add_source(config::File::with_name(DEFAULT_CONFIG_BASENAME).required(false));
                }
            }
        }

        if self.use_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let config: DelegationConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DelegationError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from))
    }
}
