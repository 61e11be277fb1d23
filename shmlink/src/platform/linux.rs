//! Linux-specific System V IPC and file locking primitives.
//!
//! Thin wrappers that turn libc return codes into `nix::Result`. Semantics
//! (size checks, create-or-attach, attachment accounting) live in
//! [`crate::backend`].

use nix::errno::Errno;
use nix::unistd::getpid;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;

/// Subset of `shmid_ds` the channel cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmStat {
    /// Segment size in bytes as requested at creation
    pub size: usize,
    /// Number of current attachments across all processes
    pub attached: u64,
    /// Permission bits
    pub mode: u32,
}

/// Create a new segment; fails with `EEXIST` if `key` is taken.
pub fn shm_create_exclusive(key: i32, size: usize, mode: u32) -> nix::Result<i32> {
    let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
    Errno::result(unsafe { libc::shmget(key as libc::key_t, size, flags) })
}

/// Look up an existing segment without creating or size checking it.
pub fn shm_lookup(key: i32) -> nix::Result<i32> {
    Errno::result(unsafe { libc::shmget(key as libc::key_t, 0, 0) })
}

/// Query size, attachment count and mode.
pub fn shm_stat(id: i32) -> nix::Result<ShmStat> {
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    Errno::result(unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) })?;
    Ok(ShmStat {
        size: ds.shm_segsz as usize,
        attached: ds.shm_nattch as u64,
        mode: ds.shm_perm.mode as u32 & 0o777,
    })
}

/// Map a segment into this process.
pub fn shm_attach(id: i32) -> nix::Result<NonNull<u8>> {
    let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(Errno::last());
    }
    NonNull::new(addr as *mut u8).ok_or(Errno::EINVAL)
}

/// Unmap a segment previously returned by [`shm_attach`].
pub fn shm_detach(base: NonNull<u8>) -> nix::Result<()> {
    Errno::result(unsafe { libc::shmdt(base.as_ptr() as *const libc::c_void) }).map(drop)
}

/// Mark a segment for destruction once the last process detaches.
pub fn shm_remove(id: i32) -> nix::Result<()> {
    Errno::result(unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) }).map(drop)
}

/// Create a single-semaphore set; fails with `EEXIST` if `key` is taken.
pub fn sem_create_exclusive(key: i32, mode: u32) -> nix::Result<i32> {
    let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
    Errno::result(unsafe { libc::semget(key as libc::key_t, 1, flags) })
}

/// Look up an existing semaphore set.
pub fn sem_lookup(key: i32) -> nix::Result<i32> {
    Errno::result(unsafe { libc::semget(key as libc::key_t, 0, 0) })
}

/// Post semaphore 0 once, without `SEM_UNDO`.
///
/// Used by the creator to publish the initial value; the `semop` also stamps
/// `sem_otime`, which [`sem_initialized`] reports.
pub fn sem_post_initial(id: i32) -> nix::Result<()> {
    let mut op = libc::sembuf {
        sem_num: 0,
        sem_op: 1,
        sem_flg: 0,
    };
    Errno::result(unsafe { libc::semop(id, &mut op, 1) }).map(drop)
}

/// Whether any `semop` has run on the set since it was created.
pub fn sem_initialized(id: i32) -> nix::Result<bool> {
    let mut ds: libc::semid_ds = unsafe { std::mem::zeroed() };
    Errno::result(unsafe { libc::semctl(id, 0, libc::IPC_STAT, &mut ds as *mut libc::semid_ds) })?;
    Ok(ds.sem_otime != 0)
}

/// Current value of semaphore 0.
pub fn sem_value(id: i32) -> nix::Result<i32> {
    Errno::result(unsafe { libc::semctl(id, 0, libc::GETVAL) })
}

/// Non-blocking `semop` on semaphore 0 with `SEM_UNDO`.
///
/// Returns `Ok(false)` when the operation would block.
pub fn sem_try_op(id: i32, delta: i16) -> nix::Result<bool> {
    let mut op = libc::sembuf {
        sem_num: 0,
        sem_op: delta,
        sem_flg: (libc::IPC_NOWAIT | libc::SEM_UNDO) as libc::c_short,
    };
    match Errno::result(unsafe { libc::semop(id, &mut op, 1) }) {
        Ok(_) => Ok(true),
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a semaphore set immediately.
pub fn sem_remove(id: i32) -> nix::Result<()> {
    Errno::result(unsafe { libc::semctl(id, 0, libc::IPC_RMID) }).map(drop)
}

/// `flock` in non-blocking mode; `Ok(false)` when another holder conflicts.
pub fn flock_try(fd: RawFd, exclusive: bool) -> nix::Result<bool> {
    let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
    match Errno::result(unsafe { libc::flock(fd, op | libc::LOCK_NB) }) {
        Ok(_) => Ok(true),
        Err(Errno::EWOULDBLOCK) | Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Blocking shared `flock`, retried on `EINTR`.
pub fn flock_shared(fd: RawFd) -> nix::Result<()> {
    loop {
        match Errno::result(unsafe { libc::flock(fd, libc::LOCK_SH) }) {
            Err(Errno::EINTR) => continue,
            other => return other.map(drop),
        }
    }
}

/// Release any `flock` held through `fd`.
pub fn flock_release(fd: RawFd) -> nix::Result<()> {
    Errno::result(unsafe { libc::flock(fd, libc::LOCK_UN) }).map(drop)
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
