use std::sync::atomic::Ordering;

use crate::shm::layout::{BucketHead, SLOT_LINKED};
use crate::shm::{list, Arena, SpinGuard};
use crate::strategies::EvictionPolicy;

use super::Table;

/// Handle to an item inside a locked bucket.
///
/// Only meaningful to the [`BucketGuard`] that produced it. An id kept past
/// the item's removal is refused, even once its slot holds another item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemId {
    slot: u32,
    generation: u32,
}

/// A locked bucket. Other threads and processes touching this bucket block
/// until the guard is dropped.
///
/// Do not insert into, or lock another bucket of, the same table while
/// holding a guard: eviction may need this bucket.
pub struct BucketGuard<'t, P, S, A>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    table: &'t Table<P, S, A>,
    index: usize,
    _guard: SpinGuard<'t>,
}

impl<'t, P, S, A> BucketGuard<'t, P, S, A>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    pub(super) fn new(table: &'t Table<P, S, A>, index: usize) -> Self {
        let guard = table.buckets()[index].lock.lock();
        BucketGuard {
            table,
            index,
            _guard: guard,
        }
    }

    fn head(&self) -> &BucketHead {
        &self.table.buckets()[self.index]
    }

    /// Whether `item` is currently linked in this bucket.
    fn owns(&self, item: ItemId) -> bool {
        self.table.slots().get(item.slot as usize).is_some_and(|slot| {
            slot.state.load(Ordering::Relaxed) == SLOT_LINKED
                && slot.generation.load(Ordering::Relaxed) == item.generation
                && slot.bucket.load(Ordering::Relaxed) as usize == self.index
        })
    }

    /// Index of the locked bucket.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.head().len.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head().is_empty()
    }

    /// Items in chain order, oldest first.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        let slots = self.table.slots();
        list::chain(self.head(), slots).map(move |slot| ItemId {
            slot,
            generation: slots[slot as usize].generation.load(Ordering::Relaxed),
        })
    }

    /// First item (in chain order) the policy says matches `needle`.
    pub fn find(&self, needle: &S::Needle) -> Option<ItemId> {
        self.items().find(|&item| {
            // Safety: linked in this bucket, whose lock we hold.
            let payload = unsafe { self.table.payload_ref(item.slot) };
            self.table.policy.equals(needle, payload)
        })
    }

    pub fn payload(&self, item: ItemId) -> Option<&P> {
        // Safety: linked in this bucket, whose lock we hold.
        self.owns(item)
            .then(|| unsafe { self.table.payload_ref(item.slot) })
    }

    pub fn payload_mut(&mut self, item: ItemId) -> Option<&mut P> {
        if !self.owns(item) {
            return None;
        }
        // Safety: linked in this bucket, whose lock we hold; `&mut self`
        // rules out any other reference handed out by this guard.
        Some(unsafe { self.table.payload_mut(item.slot) })
    }

    /// Unlink `item` and move its payload out to the caller, lowering the
    /// item count.
    pub fn take(&mut self, item: ItemId) -> Option<P> {
        if !self.owns(item) {
            return None;
        }
        self.table.count_down(1);
        Some(self.table.detach(self.head(), item.slot))
    }

    /// Unlink `item`, lower the item count and release the payload through
    /// the policy.
    pub fn remove(&mut self, item: ItemId) -> bool {
        match self.take(item) {
            Some(payload) => {
                self.table.policy.release(payload);
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove) but leaves the item count alone. The
    /// caller settles it afterwards with [`Table::discount`], typically once
    /// for a batch of removals.
    pub fn remove_uncounted(&mut self, item: ItemId) -> bool {
        if !self.owns(item) {
            return false;
        }
        let payload = self.table.detach(self.head(), item.slot);
        self.table.policy.release(payload);
        true
    }
}
