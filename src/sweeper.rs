//! Incremental garbage collection.
//!
//! Sweeping a large table in one go holds bucket locks back to back for a
//! long time. A [`Sweeper`] splits the bucket range into slices so that each
//! timer tick only sweeps one slice; over `slices` ticks the whole table is
//! covered. A [`Collector`] drives a sweeper from a background thread.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::shm::Arena;
use crate::strategies::EvictionPolicy;
use crate::table::Table;

/// Cycles through the bucket range of a table one slice at a time.
#[derive(Clone, Debug)]
pub struct Sweeper {
    bucket_count: usize,
    slices: usize,
    per_slice: usize,
    next: usize,
}

impl Sweeper {
    /// Split `bucket_count` buckets into `slices` slices of equal width; the
    /// last slice also takes the remainder.
    pub fn new(bucket_count: usize, slices: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let slices = slices.clamp(1, bucket_count);
        Sweeper {
            bucket_count,
            slices,
            per_slice: bucket_count / slices,
            next: 0,
        }
    }

    /// Slice so that every item is looked at about once per `validity`
    /// when ticking every `interval`.
    pub fn for_validity(bucket_count: usize, validity: Duration, interval: Duration) -> Self {
        let slices = validity.as_millis() / interval.as_millis().max(1);
        Self::new(bucket_count, slices.try_into().unwrap_or(usize::MAX))
    }

    pub fn slices(&self) -> usize {
        self.slices
    }

    /// The range to sweep on this tick. Advances to the next slice, wrapping
    /// after the last one.
    pub fn next_range(&mut self) -> RangeInclusive<usize> {
        let start = self.next * self.per_slice;
        if self.next + 1 == self.slices {
            self.next = 0;
            start..=self.bucket_count - 1
        } else {
            self.next += 1;
            start..=start + self.per_slice - 1
        }
    }

    /// Garbage collect the next slice of `table`.
    pub fn sweep<P, S, A>(&mut self, table: &Table<P, S, A>) -> usize
    where
        S: EvictionPolicy<P>,
        A: Arena,
    {
        table.garbage_collect(self.next_range())
    }
}

/// Background thread running a tick every interval until stopped.
///
/// The thread is stopped and joined when the collector is dropped.
pub struct Collector {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Collector {
    /// Sweep one slice of `table` every `interval`.
    ///
    /// The sweeper is shared, so sweeps run elsewhere between ticks move the
    /// same cursor.
    pub fn spawn<P, S, A>(
        table: Arc<Table<P, S, A>>,
        sweeper: Arc<Mutex<Sweeper>>,
        interval: Duration,
    ) -> Result<Self>
    where
        P: Send + 'static,
        S: EvictionPolicy<P> + 'static,
        A: Arena + 'static,
    {
        Self::spawn_with(interval, move || {
            sweeper.lock().sweep(&table);
        })
    }

    /// Run `tick` every `interval`. The first tick happens one interval after
    /// spawning.
    pub fn spawn_with<F>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("ttable-gc".to_string())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                loop {
                    let deadline = Instant::now() + interval;
                    let mut stopped = lock.lock();
                    while !*stopped {
                        if cvar.wait_until(&mut stopped, deadline).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    tick();
                }
                log::debug!("collector thread stopped");
            })?;

        log::debug!("collector started, interval {interval:?}");
        Ok(Collector {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for a tick in progress to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (lock, cvar) = &*self.shutdown;
        *lock.lock() = true;
        cvar.notify_all();
        if handle.join().is_err() {
            log::error!("collector thread panicked");
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}
