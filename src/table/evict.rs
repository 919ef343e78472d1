use std::ops::RangeInclusive;

use crate::shm::{list, Arena};
use crate::strategies::{EvictionPolicy, Least};

use super::Table;

impl<P, S, A> Table<P, S, A>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    /// Evict one item to make room, scanning buckets from the one `hash`
    /// maps to. Returns whether an item was removed.
    ///
    /// Only the first non-empty bucket reached is considered, so the victim
    /// is the least item of that bucket, not of the whole table.
    pub fn evict(&self, hash: u32) -> bool {
        self.remove_least(self.bucket_index(hash))
    }

    pub(super) fn remove_least(&self, start: usize) -> bool {
        if !S::EVICTS {
            return false;
        }
        let snapshot = self.policy.begin_search();
        let n = self.bucket_count();

        for step in 0..n {
            let index = (start + step) % n;
            let bucket = &self.buckets()[index];
            let guard = bucket.lock.lock();

            let mut least = None;
            for item in list::chain(bucket, self.slots()) {
                let Some(candidate) = least else {
                    least = Some(item);
                    continue;
                };
                // Safety: both are linked in this bucket and we hold its lock.
                let (first, second) =
                    unsafe { (self.payload_ref(candidate), self.payload_ref(item)) };
                match self.policy.least(&snapshot, first, second) {
                    Least::First | Least::Equal => {}
                    Least::Second => least = Some(item),
                    Least::FirstAbsolute => break,
                    Least::SecondAbsolute => {
                        least = Some(item);
                        break;
                    }
                }
            }

            if let Some(victim) = least {
                self.count_down(1);
                let payload = self.detach(bucket, victim);
                drop(guard);
                log::trace!("evicted an item from bucket {index}");
                self.policy.release(payload);
                return true;
            }
        }

        log::debug!("eviction found no item to remove");
        false
    }

    /// Remove every item the policy calls garbage from buckets in `range`.
    ///
    /// The end of the range is clamped to the last bucket. Each bucket is
    /// locked on its own, and its removals are taken off the item count in
    /// one step. Payloads are released after the bucket is unlocked. Returns
    /// the number of items removed.
    pub fn garbage_collect(&self, range: RangeInclusive<usize>) -> usize {
        if !S::COLLECTS_GARBAGE {
            return 0;
        }
        let snapshot = self.policy.begin_search();
        if self.locked_item_count() == 0 {
            return 0;
        }

        let start = *range.start();
        let end = (*range.end()).min(self.bucket_count() - 1);
        let mut total = 0;
        let mut garbage = Vec::new();

        for bucket in self.buckets().get(start..=end).unwrap_or_default() {
            let guard = bucket.lock.lock();
            for item in list::chain(bucket, self.slots()) {
                // Safety: linked in this bucket, whose lock we hold.
                let payload = unsafe { self.payload_ref(item) };
                if self.policy.is_garbage(&snapshot, payload) {
                    garbage.push(self.detach(bucket, item));
                }
            }
            if garbage.is_empty() {
                continue;
            }
            self.count_down(garbage.len() as u32);
            drop(guard);

            total += garbage.len();
            for payload in garbage.drain(..) {
                self.policy.release(payload);
            }
        }

        if total > 0 {
            log::debug!("collected {total} items from buckets {start}..={end}");
        }
        total
    }

    /// Sweep every bucket for garbage.
    pub fn garbage_collect_all(&self) -> usize {
        self.garbage_collect(0..=self.bucket_count() - 1)
    }
}
