//! Spin lock that lives inside a shared memory region.
//!
//! Layout in shared memory (4 bytes): `[state: u32]`, 0 = unlocked.
//!
//! Acquisition is test-and-test-and-set: spin on a plain load (no bus
//! traffic) and only CAS once the word reads as free. After a bounded
//! number of spins the waiter yields its time slice so a holder that got
//! preempted can make progress.

use std::sync::atomic::{AtomicU32, Ordering};

/// Spins before the waiter starts yielding to the scheduler.
const SPINS_BEFORE_YIELD: u32 = 64;

#[repr(transparent)]
#[derive(Debug, Default)]
pub struct ShmSpinLock {
    state: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<ShmSpinLock>() == 4);

impl ShmSpinLock {
    pub const fn new() -> Self {
        ShmSpinLock {
            state: AtomicU32::new(0),
        }
    }

    /// Acquire the lock. Blocks (spins, then yields) until acquired.
    #[inline]
    pub fn lock(&self) -> SpinGuard<'_> {
        let mut spins = 0u32;
        loop {
            // Test: spin on load
            while self.state.load(Ordering::Relaxed) != 0 {
                if spins < SPINS_BEFORE_YIELD {
                    spins += 1;
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            // Test-and-Set
            if self
                .state
                .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
        }
    }

    /// Acquire the lock only if it is free right now.
    #[cfg(test)]
    pub(crate) fn try_lock(&self) -> Option<SpinGuard<'_>> {
        self.state
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }
}

/// Releases the lock on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinGuard<'a> {
    lock: &'a ShmSpinLock,
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_unlock() {
        let lock = ShmSpinLock::new();
        assert!(!lock.is_locked());
        {
            let _guard = lock.lock();
            assert!(lock.is_locked());
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn mutual_exclusion() {
        struct Shared {
            lock: ShmSpinLock,
            counter: std::cell::UnsafeCell<u64>,
        }
        unsafe impl Sync for Shared {}

        let shared = Arc::new(Shared {
            lock: ShmSpinLock::new(),
            counter: std::cell::UnsafeCell::new(0),
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let _guard = shared.lock.lock();
                        unsafe { *shared.counter.get() += 1 };
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let _guard = shared.lock.lock();
        assert_eq!(unsafe { *shared.counter.get() }, 40_000);
    }
}
