//! Channel and application configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "shmlink-mouse"
//! log_level = "debug"
//!
//! [channel]
//! key = 454
//! backend = "sysv"
//! permissions = 0o660
//! lock_timeout_ms = 250
//!
//! [[layout.fields]]
//! name = "x"
//! type = "i32"
//! # ...
//!
//! [mouse]
//! poll_interval_ms = 4
//! ```

use crate::backend::BackendKind;
use crate::error::ShmResult;
use crate::layout::{Layout, LayoutSpec};
use crate::mouse::MouseConfig;
use serde::{Deserialize, Serialize};
use shmlink_common::config::{ConfigError, SharedConfig};
use shmlink_common::consts::{
    DEFAULT_KEY, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_PERMISSIONS, DEFAULT_SHM_DIR,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where and how a channel's segment lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Segment key agreed between producer and consumer
    pub key: i32,
    /// OS object type
    pub backend: BackendKind,
    /// Directory for file-backed segments
    pub shm_dir: PathBuf,
    /// Permission bits applied when creating
    pub permissions: u32,
    /// Lock acquisition timeout in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY,
            backend: BackendKind::default(),
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            permissions: DEFAULT_PERMISSIONS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl ChannelConfig {
    /// Defaults for `key`.
    pub fn new(key: i32) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Directory for file-backed segments.
    pub fn with_shm_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.shm_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Permission bits used on creation.
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Lock acquisition timeout as Duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `permissions` has bits outside `0o777`
    /// - `shm_dir` is empty while the file backend is selected
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.permissions & !0o777 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "permissions {:#o} exceed 0o777",
                self.permissions
            )));
        }
        if self.backend == BackendKind::File && self.shm_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "shm_dir cannot be empty for the file backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration file shared by the trigger and mouse binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShmlinkConfig {
    /// Logging and service identity
    pub shared: SharedConfig,
    /// Segment location
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Layout; the pointer layout when absent
    #[serde(default)]
    pub layout: Option<LayoutSpec>,
    /// Consumer settings
    #[serde(default)]
    pub mouse: MouseConfig,
}

impl ShmlinkConfig {
    /// Defaults for a service.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            shared: SharedConfig::new(service_name),
            channel: ChannelConfig::default(),
            layout: None,
            mouse: MouseConfig::default(),
        }
    }

    /// Build the configured layout.
    pub fn layout(&self) -> ShmResult<Layout> {
        match &self.layout {
            Some(spec) => Layout::try_from(spec.clone()),
            None => Ok(Layout::pointer()),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.channel.validate()?;
        self.mouse.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shmlink_common::config::ConfigLoader;

    #[test]
    fn defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.key, 454);
        assert_eq!(config.backend, BackendKind::SysV);
        assert_eq!(config.permissions, 0o660);
        assert_eq!(config.lock_timeout(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_permissions() {
        let config = ChannelConfig::new(1).with_permissions(0o4755);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn lock_timeout_saturates() {
        let config = ChannelConfig::new(1).with_lock_timeout(Duration::from_millis(250));
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));

        let config = ChannelConfig::new(1).with_lock_timeout(Duration::MAX);
        assert_eq!(config.lock_timeout_ms, u64::MAX);
    }

    #[test]
    fn full_file_parses() {
        let text = r#"
[shared]
service_name = "shmlink-mouse"

[channel]
key = 900
backend = "file"
shm_dir = "/tmp"
permissions = 0o600
lock_timeout_ms = 250

[[layout.fields]]
name = "buttons"
type = "u8"

[[layout.fields]]
padding = 1

[[layout.fields]]
name = "x"
type = "i16"

[[layout.fields]]
name = "y"
type = "i16"

[[layout.fields]]
name = "changed"
type = "u8"

[[layout.fields]]
padding = 1

[mouse]
poll_interval_ms = 10
buttons_field = "buttons"
"#;
        let config = ShmlinkConfig::parse(text).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.channel.key, 900);
        assert_eq!(config.channel.backend, BackendKind::File);
        assert_eq!(config.channel.permissions, 0o600);
        assert_eq!(config.channel.lock_timeout(), Duration::from_millis(250));

        let layout = config.layout().unwrap();
        assert_eq!(layout.size(), 8);
        assert_eq!(config.mouse.buttons_field.as_deref(), Some("buttons"));
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let config = ShmlinkConfig::parse("[shared]\nservice_name = \"t\"\n").unwrap();
        assert_eq!(config.channel, ChannelConfig::default());
        assert_eq!(config.layout().unwrap(), Layout::pointer());
    }
}
