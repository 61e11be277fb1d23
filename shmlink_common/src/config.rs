//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across the shmlink binaries.
//!
//! # Usage
//!
//! ```rust,no_run
//! use shmlink_common::config::{ConfigLoader, SharedConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct TriggerConfig {
//!     shared: SharedConfig,
//!     key: i32,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = TriggerConfig::load(Path::new("trigger.toml"))?;
//!     println!("Service: {} on key {}", config.shared.service_name, config.key);
//!     Ok(())
//! }
//! ```

use crate::consts::DEFAULT_CONFIG_PATH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to produce a usable configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("Cannot read {}: {reason}", .path.display())]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// OS error text
        reason: String,
    },

    /// Invalid TOML, or TOML that does not match the expected shape.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Parsed, but a value is out of bounds.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Logging verbosity, spelled in lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every lock wait and poll
    Trace,
    /// Attach, detach and contention
    Debug,
    /// Create, destroy, published updates
    #[default]
    Info,
    /// Recoverable failures
    Warn,
    /// Fatal failures only
    Error,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// `[shared]` section every shmlink binary reads.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "shmlink-trigger"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default verbosity when neither `-v` nor `RUST_LOG` overrides it.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name reported in logs.
    pub service_name: String,
}

impl SharedConfig {
    /// Section for `service_name` at the default log level.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: service_name.into(),
        }
    }

    /// Reject an empty `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.service_name.trim() {
            "" => Err(ConfigError::ValidationError(
                "service_name cannot be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// TOML loading for any deserializable config type.
///
/// `load` reports a missing file as [`ConfigError::FileNotFound`] and any
/// other read failure as [`ConfigError::Unreadable`]; both `load` and `parse`
/// report bad TOML as [`ConfigError::ParseError`].
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    /// Parse TOML text.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Config file a binary should read.
///
/// An explicit path always wins, even if missing, so the caller reports it.
/// Otherwise `fallback` is used only when it exists.
pub fn resolve_config_path(explicit: Option<&Path>, fallback: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => fallback.is_file().then(|| fallback.to_path_buf()),
    }
}

/// [`resolve_config_path`] against [`DEFAULT_CONFIG_PATH`].
pub fn default_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    resolve_config_path(explicit, Path::new(DEFAULT_CONFIG_PATH))
}
