//! Keyed shared-memory channel with a fixed typed layout.
//!
//! A [`SharedStructChannel`] is an explicit handle on one shared segment. Any
//! number of processes (and threads, through `&SharedStructChannel`) may hold
//! handles to the same key. Individual fields are read and written without
//! locking; updates spanning several fields go through
//! [`SharedStructChannel::write_atomic_update`] or an explicit
//! [`SharedStructChannel::lock`] guard, and guarded readers take the same lock.
//!
//! # Example
//!
//! ```rust,no_run
//! use shmlink::{Layout, SharedStructChannel};
//!
//! # fn main() -> shmlink::ShmResult<()> {
//! let channel = SharedStructChannel::open_or_create(454, Layout::pointer())?;
//! channel.write_atomic_update(&[("x", 55), ("y", 0), ("changed", 1)])?;
//!
//! if let Some(update) = channel.take_update("changed")? {
//!     println!("x={} y={}", update.get("x")?, update.get("y")?);
//! }
//! # Ok(())
//! # }
//! ```

use crate::backend::{self, KeyedLock, Segment};
use crate::config::ChannelConfig;
use crate::error::{ShmError, ShmResult};
use crate::layout::{Field, Layout, Snapshot};
use crate::lock::ChannelLock;
use crate::record::SharedRecord;
use crate::region::Region;
use parking_lot::MutexGuard;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Holds no segment; reached after `destroy`
    Unattached,
    /// Mapped and usable
    Attached,
    /// Unmapped by `close`; the segment survives
    Closed,
}

struct Attachment {
    segment: Box<dyn Segment>,
    lock: Box<dyn KeyedLock>,
}

/// Handle on a keyed shared segment with a typed layout.
pub struct SharedStructChannel {
    config: ChannelConfig,
    layout: Arc<Layout>,
    attachment: Option<Attachment>,
    lock: ChannelLock,
}

impl SharedStructChannel {
    /// Attach to the segment for `key`, creating it if absent.
    pub fn open_or_create(key: i32, layout: Layout) -> ShmResult<Self> {
        Self::open_or_create_with(ChannelConfig::new(key), layout)
    }

    /// [`SharedStructChannel::open_or_create`] with explicit settings.
    ///
    /// # Errors
    ///
    /// - `SegmentSizeMismatch` if the segment exists with another size; the
    ///   segment is left untouched
    /// - `PermissionDenied` if the caller lacks rights to the segment or lock
    pub fn open_or_create_with(config: ChannelConfig, layout: Layout) -> ShmResult<Self> {
        Self::open(config, layout, true)
    }

    /// Attach to an existing segment for `key`; never creates.
    pub fn attach(key: i32, layout: Layout) -> ShmResult<Self> {
        Self::attach_with(ChannelConfig::new(key), layout)
    }

    /// [`SharedStructChannel::attach`] with explicit settings.
    ///
    /// # Errors
    ///
    /// `NotFound` when no segment exists, plus those of
    /// [`SharedStructChannel::open_or_create_with`].
    pub fn attach_with(config: ChannelConfig, layout: Layout) -> ShmResult<Self> {
        Self::open(config, layout, false)
    }

    fn open(config: ChannelConfig, layout: Layout, create: bool) -> ShmResult<Self> {
        config.validate()?;
        let opened = backend::open(&config, layout.size(), create)?;

        if opened.created {
            info!(
                key = config.key,
                backend = %config.backend,
                size = layout.size(),
                fingerprint = layout.fingerprint(),
                "created channel segment"
            );
        } else {
            debug!(
                key = config.key,
                backend = %config.backend,
                fingerprint = layout.fingerprint(),
                "attached to existing channel segment"
            );
        }

        Ok(Self {
            lock: ChannelLock::new(config.key, config.lock_timeout()),
            config,
            layout: Arc::new(layout),
            attachment: Some(Attachment {
                segment: opened.segment,
                lock: opened.lock,
            }),
        })
    }

    /// Destroy the segment for `config.key` without holding a handle.
    ///
    /// # Errors
    ///
    /// `StillAttached` if any process maps the segment, `NotFound` if there
    /// is none.
    pub fn destroy_key(config: &ChannelConfig) -> ShmResult<()> {
        backend::destroy_key(config)?;
        info!(key = config.key, backend = %config.backend, "destroyed channel segment");
        Ok(())
    }

    /// Segment key
    pub fn key(&self) -> i32 {
        self.config.key
    }

    /// Settings the handle was opened with
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Layout the handle was opened with
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Region size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        match &self.attachment {
            None => ChannelState::Unattached,
            Some(a) if a.segment.base().is_null() => ChannelState::Closed,
            Some(_) => ChannelState::Attached,
        }
    }

    /// Attachments across all processes; `None` when the backend cannot tell.
    pub fn attach_count(&self) -> ShmResult<Option<u64>> {
        self.attached()?.segment.attach_count()
    }

    fn attached(&self) -> ShmResult<&Attachment> {
        match &self.attachment {
            Some(a) if !a.segment.base().is_null() => Ok(a),
            _ => Err(ShmError::NotAttached),
        }
    }

    fn region(&self) -> ShmResult<Region> {
        let attachment = self.attached()?;
        // SAFETY: the mapping stays valid until `close`/`destroy`, which need
        // `&mut self` and so cannot overlap with this borrow.
        Ok(unsafe { Region::new(attachment.segment.base(), attachment.segment.len()) })
    }

    /// Current value of `name`, without locking.
    pub fn read_field(&self, name: &str) -> ShmResult<i64> {
        let field = self.layout.field(name)?;
        Ok(self.region()?.load(field))
    }

    /// Write one field without locking.
    ///
    /// # Errors
    ///
    /// `UnknownField`, `ValueOutOfRange`, or `NotAttached` after `close`.
    pub fn write_field(&self, name: &str, value: i64) -> ShmResult<()> {
        let field = self.layout.field(name)?;
        field.check(value)?;
        self.region()?.store(field, value);
        Ok(())
    }

    /// Write several fields as one indivisible update.
    ///
    /// Every name and value is validated before anything is written; on error
    /// the region is unchanged. The writes happen inside the cross-process
    /// lock, so guarded readers see all of them or none.
    ///
    /// # Errors
    ///
    /// `UnknownField`, `ValueOutOfRange`, `LockTimeout`, `NotAttached`.
    pub fn write_atomic_update(&self, fields: &[(&str, i64)]) -> ShmResult<()> {
        let resolved = fields
            .iter()
            .map(|&(name, value)| -> ShmResult<(&Field, i64)> {
                let field = self.layout.field(name)?;
                field.check(value)?;
                Ok((field, value))
            })
            .collect::<ShmResult<Vec<_>>>()?;

        let guard = self.lock()?;
        for (field, value) in resolved {
            guard.region.store(field, value);
        }
        Ok(())
    }

    /// Read every field inside the lock.
    pub fn read_snapshot(&self) -> ShmResult<Snapshot> {
        Ok(self.lock()?.snapshot())
    }

    /// Consume a pending update signalled by `flag`.
    ///
    /// Under the lock: if `flag` is non-zero, snapshot every field (the
    /// snapshot still shows the flag set) and reset `flag` to 0. Returns
    /// `None` when no update is pending.
    pub fn take_update(&self, flag: &str) -> ShmResult<Option<Snapshot>> {
        let flag = self.layout.field(flag)?;
        let guard = self.lock()?;
        if guard.region.load(flag) == 0 {
            return Ok(None);
        }
        let snapshot = guard.snapshot();
        guard.region.store(flag, 0);
        Ok(Some(snapshot))
    }

    /// Publish a record as one locked update.
    pub fn write_record<R: SharedRecord>(&self, record: &R) -> ShmResult<()> {
        self.write_atomic_update(&record.to_fields())
    }

    /// Read a record from a guarded snapshot.
    pub fn read_record<R: SharedRecord>(&self) -> ShmResult<R> {
        R::from_snapshot(&self.read_snapshot()?)
    }

    /// Take the cross-process lock.
    ///
    /// Blocks up to the configured lock timeout. The guard releases the lock
    /// when dropped.
    ///
    /// # Errors
    ///
    /// `LockTimeout` if the lock is not acquired in time, `NotAttached` after
    /// `close`.
    pub fn lock(&self) -> ShmResult<ChannelGuard<'_>> {
        let region = self.region()?;
        let attachment = self.attached()?;
        let local = self.lock.acquire(attachment.lock.as_ref())?;
        Ok(ChannelGuard {
            channel: self,
            keyed: attachment.lock.as_ref(),
            region,
            _local: local,
        })
    }

    /// Unmap the segment from this process. The segment survives; idempotent.
    pub fn close(&mut self) -> ShmResult<()> {
        if let Some(attachment) = self.attachment.as_mut() {
            if !attachment.segment.base().is_null() {
                attachment.segment.detach()?;
                debug!(key = self.config.key, "channel closed");
            }
        }
        Ok(())
    }

    /// Destroy the segment and its lock.
    ///
    /// Valid while attached or closed. This handle's own mapping is released;
    /// the handle ends up [`ChannelState::Unattached`].
    ///
    /// # Errors
    ///
    /// `StillAttached` if another handle maps the segment; nothing is removed
    /// and this handle stays usable. `NotFound` if already destroyed.
    pub fn destroy(&mut self) -> ShmResult<()> {
        let Some(attachment) = self.attachment.as_mut() else {
            return Err(ShmError::NotFound {
                key: self.config.key,
            });
        };

        attachment.segment.remove()?;
        if let Err(e) = attachment.lock.remove() {
            warn!(key = self.config.key, "failed to remove channel lock: {}", e);
        }
        self.attachment = None;

        info!(key = self.config.key, backend = %self.config.backend, "destroyed channel segment");
        Ok(())
    }
}

impl Drop for SharedStructChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(key = self.config.key, "failed to detach channel on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for SharedStructChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStructChannel")
            .field("key", &self.config.key)
            .field("backend", &self.config.backend)
            .field("size", &self.layout.size())
            .field("state", &self.state())
            .finish()
    }
}

/// Held cross-process lock on a channel.
///
/// Reads and writes through the guard form one critical section with respect
/// to every other locked operation on the same key.
pub struct ChannelGuard<'a> {
    channel: &'a SharedStructChannel,
    keyed: &'a dyn KeyedLock,
    region: Region,
    _local: MutexGuard<'a, ()>,
}

impl ChannelGuard<'_> {
    /// Value of `name`.
    pub fn read_field(&self, name: &str) -> ShmResult<i64> {
        let field = self.channel.layout.field(name)?;
        Ok(self.region.load(field))
    }

    /// Write `name`.
    pub fn write_field(&self, name: &str, value: i64) -> ShmResult<()> {
        let field = self.channel.layout.field(name)?;
        field.check(value)?;
        self.region.store(field, value);
        Ok(())
    }

    /// Every field at once.
    pub fn snapshot(&self) -> Snapshot {
        let values = self
            .channel
            .layout
            .fields()
            .iter()
            .map(|f| self.region.load(f))
            .collect();
        Snapshot::new(Arc::clone(&self.channel.layout), values)
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.channel.lock.release(self.keyed);
    }
}
