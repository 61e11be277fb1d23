//! File-backed segment mapped with memmap2 and locked with flock

use super::{KeyedLock, Opened, Segment};
use crate::config::ChannelConfig;
use crate::error::{ShmError, ShmResult};
use crate::platform;
use memmap2::{MmapMut, MmapOptions};
use shmlink_common::consts::SEGMENT_FILE_PREFIX;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the data file for `key` under `dir`.
pub fn segment_path(dir: &Path, key: i32) -> PathBuf {
    dir.join(format!("{SEGMENT_FILE_PREFIX}{key}"))
}

/// Path of the lock file for `key` under `dir`.
pub fn lock_path(dir: &Path, key: i32) -> PathBuf {
    dir.join(format!("{SEGMENT_FILE_PREFIX}{key}.lock"))
}

/// Mapped data file. A shared `flock` on the file marks this handle as
/// attached; destruction requires the exclusive lock.
pub struct FileSegment {
    key: i32,
    path: PathBuf,
    file: Option<File>,
    mmap: Option<MmapMut>,
    base: *mut u8,
    len: usize,
}

// See `SysVSegment`: the raw base pointer aliases a shared mapping.
unsafe impl Send for FileSegment {}
unsafe impl Sync for FileSegment {}

impl Segment for FileSegment {
    fn base(&self) -> *mut u8 {
        if self.mmap.is_some() {
            self.base
        } else {
            std::ptr::null_mut()
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn attach_count(&self) -> ShmResult<Option<u64>> {
        Ok(None)
    }

    fn detach(&mut self) -> ShmResult<()> {
        if self.mmap.take().is_some() {
            // Closing the descriptor drops the shared presence lock.
            self.file = None;
            debug!(key = self.key, path = %self.path.display(), "detached file segment");
        }
        Ok(())
    }

    fn remove(&mut self) -> ShmResult<()> {
        let exclusive = match &self.file {
            // Convert our own shared lock; the conversion may drop it on failure.
            Some(file) => {
                let fd = file.as_raw_fd();
                let taken = platform::flock_try(fd, true)?;
                if !taken {
                    platform::flock_shared(fd)?;
                }
                taken
            }
            None => {
                let file = File::open(&self.path).map_err(|e| ShmError::from_io(self.key, e))?;
                platform::flock_try(file.as_raw_fd(), true)?
            }
        };
        if !exclusive {
            return Err(ShmError::StillAttached {
                key: self.key,
                attached: None,
            });
        }

        std::fs::remove_file(&self.path).map_err(|e| ShmError::from_io(self.key, e))?;
        self.detach()
    }
}

/// Exclusive `flock` on the key's lock file.
pub struct FlockLock {
    key: i32,
    path: PathBuf,
    file: File,
}

impl FlockLock {
    /// Open (creating if needed) the lock file for `key`.
    pub fn open(dir: &Path, key: i32, permissions: u32) -> ShmResult<Self> {
        let path = lock_path(dir, key);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(permissions)
            .open(&path)
            .map_err(|e| ShmError::from_io(key, e))?;
        Ok(Self { key, path, file })
    }
}

impl KeyedLock for FlockLock {
    fn try_acquire(&self) -> ShmResult<bool> {
        platform::flock_try(self.file.as_raw_fd(), true).map_err(|e| ShmError::from_errno(self.key, e))
    }

    fn release(&self) -> ShmResult<()> {
        platform::flock_release(self.file.as_raw_fd())?;
        Ok(())
    }

    fn remove(&self) -> ShmResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ShmError::from_io(self.key, e)),
        }
    }
}

/// Create-or-attach (or attach-only) the file for `config.key`.
pub fn open(config: &ChannelConfig, size: usize, create: bool) -> ShmResult<Opened> {
    let key = config.key;
    let path = segment_path(&config.shm_dir, key);

    let created = create && create_sized(&config.shm_dir, &path, key, size, config.permissions)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| ShmError::from_io(key, e))?;

    let actual = file.metadata().map_err(|e| ShmError::from_io(key, e))?.len() as usize;
    if actual != size {
        return Err(ShmError::SegmentSizeMismatch {
            key,
            expected: size,
            actual,
        });
    }

    platform::flock_shared(file.as_raw_fd())?;
    let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
    let base = mmap.as_mut_ptr();
    let lock = FlockLock::open(&config.shm_dir, key, config.permissions)?;

    debug!(key, path = %path.display(), size, created, "attached file segment");
    Ok(Opened {
        segment: Box::new(FileSegment {
            key,
            path,
            file: Some(file),
            mmap: Some(mmap),
            base,
            len: size,
        }),
        lock: Box::new(lock),
        created,
    })
}

/// Publish a zero-filled file of `size` bytes at `path` atomically.
///
/// Returns `Ok(false)` if the path already exists. The file is sized under a
/// temporary name and hard-linked into place, so attachers never observe a
/// partially sized segment.
fn create_sized(dir: &Path, path: &Path, key: i32, size: usize, permissions: u32) -> ShmResult<bool> {
    if path.exists() {
        return Ok(false);
    }

    let tmp = dir.join(format!(
        ".{SEGMENT_FILE_PREFIX}{key}.{}.tmp",
        platform::get_current_pid()
    ));
    let result = (|| {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .mode(permissions)
            .open(&tmp)?;
        file.set_len(size as u64)?;
        std::fs::hard_link(&tmp, path)
    })();
    let _ = std::fs::remove_file(&tmp);

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ShmError::from_io(key, e)),
    }
}

/// Destroy the files for `config.key` from outside any handle.
pub fn destroy_key(config: &ChannelConfig) -> ShmResult<()> {
    let key = config.key;
    let path = segment_path(&config.shm_dir, key);
    let file = File::open(&path).map_err(|e| ShmError::from_io(key, e))?;
    if !platform::flock_try(file.as_raw_fd(), true)? {
        return Err(ShmError::StillAttached {
            key,
            attached: None,
        });
    }
    std::fs::remove_file(&path).map_err(|e| ShmError::from_io(key, e))?;

    if let Err(e) = std::fs::remove_file(lock_path(&config.shm_dir, key)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(key, "failed to remove lock file: {}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use tempfile::TempDir;

    fn config(dir: &TempDir, key: i32) -> ChannelConfig {
        ChannelConfig::new(key)
            .with_backend(BackendKind::File)
            .with_shm_dir(dir.path())
    }

    #[test]
    fn create_sizes_file_and_attach_reuses_it() {
        let dir = TempDir::new().unwrap();
        let first = open(&config(&dir, 454), 12, true).unwrap();
        assert!(first.created);
        assert_eq!(
            std::fs::metadata(segment_path(dir.path(), 454)).unwrap().len(),
            12
        );

        let second = open(&config(&dir, 454), 12, true).unwrap();
        assert!(!second.created);
        assert_eq!(second.segment.attach_count().unwrap(), None);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let _seg = open(&config(&dir, 1), 8, true).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
    }

    #[test]
    fn size_mismatch() {
        let dir = TempDir::new().unwrap();
        let _first = open(&config(&dir, 2), 12, true).unwrap();
        assert!(matches!(
            open(&config(&dir, 2), 6, true),
            Err(ShmError::SegmentSizeMismatch {
                expected: 6,
                actual: 12,
                ..
            })
        ));
    }

    #[test]
    fn attach_only_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            open(&config(&dir, 3), 12, false),
            Err(ShmError::NotFound { key: 3 })
        ));
    }

    #[test]
    fn remove_detects_other_holder() {
        let dir = TempDir::new().unwrap();
        let mut first = open(&config(&dir, 4), 12, true).unwrap();
        let second = open(&config(&dir, 4), 12, true).unwrap();

        assert!(matches!(
            first.segment.remove(),
            Err(ShmError::StillAttached { attached: None, .. })
        ));
        // Still usable after the refusal.
        assert!(!first.segment.base().is_null());

        drop(second);
        first.segment.remove().unwrap();
        first.lock.remove().unwrap();
        assert!(!segment_path(dir.path(), 4).exists());
        assert!(!lock_path(dir.path(), 4).exists());
    }

    #[test]
    fn destroy_key_from_outside() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, 5);
        let opened = open(&cfg, 12, true).unwrap();
        assert!(matches!(
            destroy_key(&cfg),
            Err(ShmError::StillAttached { .. })
        ));
        drop(opened);
        destroy_key(&cfg).unwrap();
        assert!(matches!(destroy_key(&cfg), Err(ShmError::NotFound { .. })));
    }

    #[test]
    fn flock_lock_excludes_other_descriptor() {
        let dir = TempDir::new().unwrap();
        let a = FlockLock::open(dir.path(), 6, 0o600).unwrap();
        let b = FlockLock::open(dir.path(), 6, 0o600).unwrap();
        assert!(a.try_acquire().unwrap());
        assert!(!b.try_acquire().unwrap());
        a.release().unwrap();
        assert!(b.try_acquire().unwrap());
        b.release().unwrap();
    }
}
