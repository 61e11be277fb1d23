//! OS objects behind a channel: the shared region and its keyed lock.
//!
//! Two backends are provided:
//!
//! - [`BackendKind::SysV`]: `shmget`/`shmat` on the integer key, locked by a
//!   System V semaphore created under the same key. Interoperates with any
//!   process using `shmget(key, size, ...)` directly.
//! - [`BackendKind::File`]: a file `shmlink_<key>` in a directory (tmpfs by
//!   default) mapped with `memmap2`, locked by `flock` on `shmlink_<key>.lock`.
//!
//! Both resolve create-vs-attach races as "attach" and compare the existing
//! size with the layout before mapping anything.

pub mod file;
pub mod sysv;

use crate::config::ChannelConfig;
use crate::error::ShmResult;
use serde::{Deserialize, Serialize};

/// Which OS object backs a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// System V shared memory + semaphore
    #[default]
    SysV,
    /// Memory-mapped file + `flock`
    File,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SysV => f.write_str("sysv"),
            Self::File => f.write_str("file"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sysv" => Ok(Self::SysV),
            "file" => Ok(Self::File),
            other => Err(format!("unknown backend '{other}' (expected sysv or file)")),
        }
    }
}

/// A mapped shared region.
pub trait Segment: Send + Sync {
    /// Base address; valid until [`Segment::detach`] or [`Segment::remove`].
    fn base(&self) -> *mut u8;

    /// Mapped length in bytes.
    fn len(&self) -> usize;

    /// Attachments held by all processes, when the backend can count them.
    fn attach_count(&self) -> ShmResult<Option<u64>>;

    /// Unmap from this process; the OS object survives. Idempotent.
    fn detach(&mut self) -> ShmResult<()>;

    /// Destroy the OS object.
    ///
    /// Fails with `StillAttached` when another attachment is detected; this
    /// handle's own mapping does not count and is released on success.
    fn remove(&mut self) -> ShmResult<()>;
}

/// Cross-process mutual exclusion scoped to a key.
pub trait KeyedLock: Send + Sync {
    /// Take the lock if free; `Ok(false)` if another holder has it.
    fn try_acquire(&self) -> ShmResult<bool>;

    /// Release a lock taken with [`KeyedLock::try_acquire`].
    fn release(&self) -> ShmResult<()>;

    /// Destroy the lock object.
    fn remove(&self) -> ShmResult<()>;
}

/// Handles produced by opening a key.
pub struct Opened {
    /// Mapped region
    pub segment: Box<dyn Segment>,
    /// Lock for compound updates
    pub lock: Box<dyn KeyedLock>,
    /// Whether this call created the segment
    pub created: bool,
}

/// Open the segment for `config.key`, creating it when `create` is set.
pub fn open(config: &ChannelConfig, size: usize, create: bool) -> ShmResult<Opened> {
    match config.backend {
        BackendKind::SysV => sysv::open(config, size, create),
        BackendKind::File => file::open(config, size, create),
    }
}

/// Destroy the segment for `config.key` without attaching to it.
pub fn destroy_key(config: &ChannelConfig) -> ShmResult<()> {
    match config.backend {
        BackendKind::SysV => sysv::destroy_key(config.key),
        BackendKind::File => file::destroy_key(config),
    }
}
