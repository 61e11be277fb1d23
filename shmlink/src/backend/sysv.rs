//! System V shared memory segment and semaphore lock

use super::{KeyedLock, Opened, Segment};
use crate::config::ChannelConfig;
use crate::error::{ShmError, ShmResult};
use crate::platform;
use nix::errno::Errno;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Create-vs-remove races are retried this many times before giving up.
const OPEN_ATTEMPTS: usize = 4;

/// Interval between checks for a freshly created semaphore's first post.
const INIT_POLL: Duration = Duration::from_millis(1);

/// Segment attached with `shmat`.
pub struct SysVSegment {
    key: i32,
    id: i32,
    base: Option<NonNull<u8>>,
    len: usize,
}

// The mapping is process-wide; access through it is synchronized by callers.
unsafe impl Send for SysVSegment {}
unsafe impl Sync for SysVSegment {}

impl Segment for SysVSegment {
    fn base(&self) -> *mut u8 {
        self.base.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn attach_count(&self) -> ShmResult<Option<u64>> {
        let stat = platform::shm_stat(self.id).map_err(|e| ShmError::from_errno(self.key, e))?;
        Ok(Some(stat.attached))
    }

    fn detach(&mut self) -> ShmResult<()> {
        if let Some(base) = self.base.take() {
            platform::shm_detach(base)?;
            debug!(key = self.key, id = self.id, "detached sysv segment");
        }
        Ok(())
    }

    fn remove(&mut self) -> ShmResult<()> {
        let stat = platform::shm_stat(self.id).map_err(|e| ShmError::from_errno(self.key, e))?;
        let mine = u64::from(self.base.is_some());
        let others = stat.attached.saturating_sub(mine);
        if others > 0 {
            return Err(ShmError::StillAttached {
                key: self.key,
                attached: Some(others),
            });
        }

        self.detach()?;
        platform::shm_remove(self.id).map_err(|e| ShmError::from_errno(self.key, e))?;
        Ok(())
    }
}

impl Drop for SysVSegment {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(key = self.key, "failed to detach sysv segment: {}", e);
        }
    }
}

/// Binary semaphore under the segment's key, operated with `SEM_UNDO` so a
/// holder that dies releases it.
pub struct SemaphoreLock {
    key: i32,
    id: i32,
}

impl SemaphoreLock {
    /// Create the semaphore (initial value 1) or attach to an existing one.
    ///
    /// Returns whether this call created it. An attacher waits up to
    /// `init_timeout` for the creator's first post; a set whose creator died
    /// before posting yields `LockTimeout` until it is destroyed.
    pub fn open(key: i32, permissions: u32, init_timeout: Duration) -> ShmResult<(Self, bool)> {
        for _ in 0..OPEN_ATTEMPTS {
            match platform::sem_create_exclusive(key, permissions) {
                Ok(id) => {
                    let lock = Self { key, id };
                    if let Err(e) = platform::sem_post_initial(id) {
                        let _ = lock.remove();
                        return Err(ShmError::from_errno(key, e));
                    }
                    debug!(key, id, "created semaphore lock");
                    return Ok((lock, true));
                }
                Err(Errno::EEXIST) => match platform::sem_lookup(key) {
                    Ok(id) => {
                        let lock = Self { key, id };
                        lock.wait_initialized(init_timeout)?;
                        return Ok((lock, false));
                    }
                    // Removed between our create and lookup; try again.
                    Err(Errno::ENOENT) => continue,
                    Err(e) => return Err(ShmError::from_errno(key, e)),
                },
                Err(e) => return Err(ShmError::from_errno(key, e)),
            }
        }
        Err(ShmError::NotFound { key })
    }

    fn wait_initialized(&self, timeout: Duration) -> ShmResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if platform::sem_initialized(self.id).map_err(|e| ShmError::from_errno(self.key, e))? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(key = self.key, id = self.id, "semaphore never initialized by its creator");
                return Err(ShmError::LockTimeout {
                    key: self.key,
                    timeout,
                });
            }
            std::thread::sleep(INIT_POLL);
        }
    }
}

impl KeyedLock for SemaphoreLock {
    fn try_acquire(&self) -> ShmResult<bool> {
        platform::sem_try_op(self.id, -1).map_err(|e| ShmError::from_errno(self.key, e))
    }

    fn release(&self) -> ShmResult<()> {
        while !platform::sem_try_op(self.id, 1).map_err(|e| ShmError::from_errno(self.key, e))? {}
        Ok(())
    }

    fn remove(&self) -> ShmResult<()> {
        match platform::sem_remove(self.id) {
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::EIDRM) => Ok(()),
            Err(e) => Err(ShmError::from_errno(self.key, e)),
        }
    }
}

/// Create-or-attach (or attach-only) by key.
pub fn open(config: &ChannelConfig, size: usize, create: bool) -> ShmResult<Opened> {
    let key = config.key;
    let (id, created) = create_or_lookup(key, size, config.permissions, create)?;

    if !created {
        let stat = platform::shm_stat(id).map_err(|e| ShmError::from_errno(key, e))?;
        if stat.size != size {
            return Err(ShmError::SegmentSizeMismatch {
                key,
                expected: size,
                actual: stat.size,
            });
        }
    }

    let (lock, lock_created) = match SemaphoreLock::open(key, config.permissions, config.lock_timeout()) {
        Ok(opened) => opened,
        Err(e) => {
            if created {
                let _ = platform::shm_remove(id);
            }
            return Err(e);
        }
    };
    let base = match platform::shm_attach(id) {
        Ok(base) => base,
        Err(e) => {
            if created {
                let _ = platform::shm_remove(id);
            }
            if lock_created {
                let _ = lock.remove();
            }
            return Err(ShmError::from_errno(key, e));
        }
    };

    debug!(key, id, size, created, "attached sysv segment");
    Ok(Opened {
        segment: Box::new(SysVSegment {
            key,
            id,
            base: Some(base),
            len: size,
        }),
        lock: Box::new(lock),
        created,
    })
}

fn create_or_lookup(key: i32, size: usize, permissions: u32, create: bool) -> ShmResult<(i32, bool)> {
    if !create {
        return platform::shm_lookup(key)
            .map(|id| (id, false))
            .map_err(|e| ShmError::from_errno(key, e));
    }

    for _ in 0..OPEN_ATTEMPTS {
        match platform::shm_create_exclusive(key, size, permissions) {
            Ok(id) => return Ok((id, true)),
            Err(Errno::EEXIST) => match platform::shm_lookup(key) {
                Ok(id) => return Ok((id, false)),
                Err(Errno::ENOENT) => continue,
                Err(e) => return Err(ShmError::from_errno(key, e)),
            },
            Err(e) => return Err(ShmError::from_errno(key, e)),
        }
    }
    Err(ShmError::NotFound { key })
}

/// Destroy the segment and semaphore for `key` from outside any handle.
pub fn destroy_key(key: i32) -> ShmResult<()> {
    let id = platform::shm_lookup(key).map_err(|e| ShmError::from_errno(key, e))?;
    let stat = platform::shm_stat(id).map_err(|e| ShmError::from_errno(key, e))?;
    if stat.attached > 0 {
        return Err(ShmError::StillAttached {
            key,
            attached: Some(stat.attached),
        });
    }
    platform::shm_remove(id).map_err(|e| ShmError::from_errno(key, e))?;

    match platform::sem_lookup(key) {
        Ok(sem) => SemaphoreLock { key, id: sem }.remove(),
        Err(Errno::ENOENT) => Ok(()),
        Err(e) => Err(ShmError::from_errno(key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::unique_key;

    fn config(key: i32) -> ChannelConfig {
        ChannelConfig::new(key)
    }

    #[test]
    fn create_then_attach() {
        let key = unique_key();
        let first = open(&config(key), 12, true).unwrap();
        assert!(first.created);

        let second = open(&config(key), 12, true).unwrap();
        assert!(!second.created);
        assert_eq!(second.segment.attach_count().unwrap(), Some(2));

        drop(first);
        drop(second);
        destroy_key(key).unwrap();
    }

    #[test]
    fn attach_only_requires_existing() {
        let key = unique_key();
        assert!(matches!(
            open(&config(key), 12, false),
            Err(ShmError::NotFound { .. })
        ));
    }

    #[test]
    fn size_mismatch_detected_before_attach() {
        let key = unique_key();
        let first = open(&config(key), 12, true).unwrap();

        let result = open(&config(key), 16, true);
        assert!(matches!(
            result,
            Err(ShmError::SegmentSizeMismatch {
                expected: 16,
                actual: 12,
                ..
            })
        ));
        assert_eq!(first.segment.attach_count().unwrap(), Some(1));

        drop(first);
        destroy_key(key).unwrap();
    }

    #[test]
    fn semaphore_excludes_second_holder() {
        let key = unique_key();
        let opened = open(&config(key), 12, true).unwrap();
        let (other, created) = SemaphoreLock::open(key, 0o600, Duration::from_millis(50)).unwrap();
        assert!(!created);

        assert!(opened.lock.try_acquire().unwrap());
        assert!(!other.try_acquire().unwrap());
        opened.lock.release().unwrap();
        assert!(other.try_acquire().unwrap());
        other.release().unwrap();

        drop(opened);
        destroy_key(key).unwrap();
    }

    #[test]
    fn semaphore_left_uninitialized_times_out() {
        let key = unique_key();
        // Creator died between semget and its first post.
        let orphan = platform::sem_create_exclusive(key, 0o600).unwrap();

        let started = Instant::now();
        let result = SemaphoreLock::open(key, 0o600, Duration::from_millis(30));
        assert!(matches!(result, Err(ShmError::LockTimeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(30));

        assert!(matches!(
            open(&config(key).with_lock_timeout(Duration::from_millis(30)), 12, true),
            Err(ShmError::LockTimeout { .. })
        ));
        // The segment created by the failed open was removed again.
        assert_eq!(platform::shm_lookup(key), Err(Errno::ENOENT));

        platform::sem_remove(orphan).unwrap();
    }

    #[test]
    fn created_semaphore_starts_free() {
        let key = unique_key();
        let (lock, created) = SemaphoreLock::open(key, 0o600, Duration::from_millis(30)).unwrap();
        assert!(created);
        assert_eq!(platform::sem_value(lock.id).unwrap(), 1);
        assert!(platform::sem_initialized(lock.id).unwrap());

        let (again, created) = SemaphoreLock::open(key, 0o600, Duration::from_millis(30)).unwrap();
        assert!(!created);
        assert!(again.try_acquire().unwrap());
        again.release().unwrap();
        lock.remove().unwrap();
    }

    #[test]
    fn remove_refuses_while_other_attached() {
        let key = unique_key();
        let mut first = open(&config(key), 12, true).unwrap();
        let second = open(&config(key), 12, true).unwrap();

        assert!(matches!(
            first.segment.remove(),
            Err(ShmError::StillAttached {
                attached: Some(1),
                ..
            })
        ));

        drop(second);
        first.segment.remove().unwrap();
        first.lock.remove().unwrap();
        assert!(matches!(destroy_key(key), Err(ShmError::NotFound { .. })));
    }
}
