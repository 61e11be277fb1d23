//! Timed acquisition of a channel's cross-process lock.

use crate::backend::KeyedLock;
use crate::error::{ShmError, ShmResult};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SPIN_ROUNDS: u32 = 64;
const YIELD_ROUNDS: u32 = 16;
const MIN_SLEEP: Duration = Duration::from_micros(50);
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Spin, then yield, then sleep with doubling intervals.
struct Backoff {
    round: u32,
    sleep: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            round: 0,
            sleep: MIN_SLEEP,
        }
    }

    /// Wait once, never past `deadline`.
    fn snooze(&mut self, deadline: Instant) {
        self.round += 1;
        if self.round <= SPIN_ROUNDS {
            std::hint::spin_loop();
        } else if self.round <= SPIN_ROUNDS + YIELD_ROUNDS {
            std::thread::yield_now();
        } else {
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.sleep.min(remaining));
            self.sleep = (self.sleep * 2).min(MAX_SLEEP);
        }
    }
}

/// In-process gate in front of a [`KeyedLock`].
///
/// OS locks are per process (semaphores with `SEM_UNDO`) or per descriptor
/// (`flock`), so threads sharing a handle are serialized here first.
pub(crate) struct ChannelLock {
    key: i32,
    timeout: Duration,
    local: Mutex<()>,
}

impl ChannelLock {
    pub(crate) fn new(key: i32, timeout: Duration) -> Self {
        Self {
            key,
            timeout,
            local: Mutex::new(()),
        }
    }

    /// Take both locks before the timeout elapses.
    ///
    /// The returned guard only covers the in-process gate; the caller must
    /// pair it with [`ChannelLock::release`] on `keyed`.
    pub(crate) fn acquire(&self, keyed: &dyn KeyedLock) -> ShmResult<MutexGuard<'_, ()>> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let local = self
            .local
            .try_lock_until(deadline)
            .ok_or(ShmError::LockTimeout {
                key: self.key,
                timeout: self.timeout,
            })?;

        let mut backoff = Backoff::new();
        loop {
            if keyed.try_acquire()? {
                if backoff.round > SPIN_ROUNDS {
                    debug!(
                        key = self.key,
                        waited_us = started.elapsed().as_micros() as u64,
                        "lock acquired after contention"
                    );
                }
                return Ok(local);
            }
            if Instant::now() >= deadline {
                debug!(key = self.key, timeout = ?self.timeout, "lock timed out");
                return Err(ShmError::LockTimeout {
                    key: self.key,
                    timeout: self.timeout,
                });
            }
            backoff.snooze(deadline);
        }
    }

    /// Release `keyed`, logging failures.
    pub(crate) fn release(&self, keyed: &dyn KeyedLock) {
        if let Err(e) = keyed.release() {
            warn!(key = self.key, "failed to release lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Keyed lock held by an imaginary other process until `free` is set.
    #[derive(Default)]
    struct Foreign {
        held: AtomicBool,
        free: AtomicBool,
    }

    impl KeyedLock for Foreign {
        fn try_acquire(&self) -> ShmResult<bool> {
            if !self.free.load(Ordering::SeqCst) {
                return Ok(false);
            }
            Ok(!self.held.swap(true, Ordering::SeqCst))
        }

        fn release(&self) -> ShmResult<()> {
            self.held.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn remove(&self) -> ShmResult<()> {
            Ok(())
        }
    }

    #[test]
    fn times_out_while_foreign_holder_keeps_lock() {
        let lock = ChannelLock::new(1, Duration::from_millis(20));
        let keyed = Foreign::default();

        let started = Instant::now();
        let result = lock.acquire(&keyed);
        assert!(matches!(
            result,
            Err(ShmError::LockTimeout { key: 1, .. })
        ));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn acquires_and_releases() {
        let lock = ChannelLock::new(2, Duration::from_millis(100));
        let keyed = Foreign::default();
        keyed.free.store(true, Ordering::SeqCst);

        let guard = lock.acquire(&keyed).unwrap();
        assert!(keyed.held.load(Ordering::SeqCst));
        lock.release(&keyed);
        drop(guard);
        assert!(!keyed.held.load(Ordering::SeqCst));

        let _again = lock.acquire(&keyed).unwrap();
    }

    #[test]
    fn threads_are_serialized_locally() {
        let lock = ChannelLock::new(3, Duration::from_millis(10));
        let keyed = Foreign::default();
        keyed.free.store(true, Ordering::SeqCst);

        let _guard = lock.acquire(&keyed).unwrap();
        std::thread::scope(|s| {
            let result = s.spawn(|| lock.acquire(&keyed).map(drop)).join().unwrap();
            assert!(matches!(result, Err(ShmError::LockTimeout { .. })));
        });
    }
}
