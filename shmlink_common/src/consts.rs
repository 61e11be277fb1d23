//! System-wide constants for the shmlink workspace.
//!
//! Single source of truth for segment identity, permissions and timing
//! defaults, imported by every crate in the workspace.

/// Default segment key shared by the trigger and the mouse consumer.
///
/// Agreed out of band, like a well-known port number.
pub const DEFAULT_KEY: i32 = 454;

/// Default permission bits for newly created segments (owner + group rw).
pub const DEFAULT_PERMISSIONS: u32 = 0o660;

/// Default lock acquisition timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1000;

/// Default directory for file-backed segments.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// File name prefix for file-backed segments (`shmlink_<key>`).
pub const SEGMENT_FILE_PREFIX: &str = "shmlink_";

/// Largest relative motion a mouse report can carry per axis.
pub const MOTION_DELTA_LIMIT: i16 = 127;

/// Default consumer poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 4;

/// Motion value the trigger publishes for one key press.
pub const TRIGGER_STEP: i32 = 55;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/shmlink/config.toml";
