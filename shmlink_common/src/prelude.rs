//! Prelude module for common re-exports.
//!
//! ```rust
//! use shmlink_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Segment Defaults ───────────────────────────────────────────────
pub use crate::consts::{DEFAULT_KEY, DEFAULT_PERMISSIONS, MOTION_DELTA_LIMIT};

/// Default lock acquisition timeout as Duration.
pub const DEFAULT_LOCK_TIMEOUT: Duration =
    Duration::from_millis(crate::consts::DEFAULT_LOCK_TIMEOUT_MS);

/// Default consumer poll interval as Duration.
pub const DEFAULT_POLL_INTERVAL: Duration =
    Duration::from_millis(crate::consts::DEFAULT_POLL_INTERVAL_MS);
