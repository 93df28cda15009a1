//! Configuration Loader
//!
//! Layers the built-in defaults, an optional TOML/YAML file and
//! `CACHE_SESSION__*` environment variables, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::SessionConfig;
use crate::logging::get_environment;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Base name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "cache-session";

/// Prefix of environment overrides, e.g. `CACHE_SESSION__ENUMERATION__CHUNK_SIZE`
pub const ENV_PREFIX: &str = "CACHE_SESSION";

/// Loaded and validated session configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: SessionConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from the working directory and the environment
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::build(None, None)
    }

    /// Load configuration from a specific file; the file must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::file_not_found(path.display().to_string()));
        }
        Self::build(Some(path), None)
    }

    /// Load with explicit environment-style overrides instead of the process
    /// environment. Keys look like `CACHE_SESSION__LOCKING__DEFAULT_LOCK_TIMEOUT_MS`.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::file_not_found(path.display().to_string()));
            }
        }
        Self::build(path, Some(overrides))
    }

    /// Wrap an already built configuration after validating it
    pub fn from_config(config: SessionConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: get_environment(),
            source_file: None,
        }))
    }

    fn build(
        path: Option<&Path>,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = get_environment();
        let defaults = config::Config::try_from(&SessionConfig::default())
            .map_err(|e| ConfigurationError::load_error("defaults", e))?;

        let mut builder = config::Config::builder().add_source(defaults);
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path.to_path_buf()).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let mut env = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true);
        if let Some(overrides) = overrides {
            env = env.source(Some(overrides.into_iter().collect()));
        }

        let source_name = path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        let config: SessionConfig = builder
            .add_source(env)
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| ConfigurationError::load_error(source_name, e))?;

        config.validate()?;

        debug!(
            environment = %environment,
            cache_id = %config.cache_id,
            chunk_size = config.enumeration.chunk_size,
            exceptions_enabled = config.exceptions_enabled,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_file: path.map(Path::to_path_buf),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if one was given explicitly
    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Effective configuration as JSON, for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}
