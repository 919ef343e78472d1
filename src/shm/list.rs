//! Intrusive doubly-linked bucket chains and the slot free list.
//!
//! Uses prev/next indices stored in each slot. Chain functions require the
//! owning bucket's lock, free-list functions require the header's
//! `alloc_lock`. Links are atomics accessed with `Relaxed` ordering: the
//! locks provide the happens-before edges.

use std::sync::atomic::Ordering::Relaxed;

use super::layout::{BucketHead, Header, Slot, SLOT_FREE, SLOT_NONE};

#[inline]
fn slot<P>(slots: &[Slot<P>], index: u32) -> &Slot<P> {
    &slots[index as usize]
}

/// Append a slot at the tail of a bucket chain.
///
/// Caller must hold `bucket.lock`.
pub fn push_tail<P>(bucket: &BucketHead, slots: &[Slot<P>], index: u32) {
    let last = bucket.last.load(Relaxed);
    let s = slot(slots, index);
    s.prev.store(last, Relaxed);
    s.next.store(SLOT_NONE, Relaxed);

    if last != SLOT_NONE {
        slot(slots, last).next.store(index, Relaxed);
    } else {
        bucket.first.store(index, Relaxed);
    }

    bucket.last.store(index, Relaxed);
    bucket.len.fetch_add(1, Relaxed);
}

/// Remove a slot from its bucket chain, fixing up the neighbours and the
/// bucket's `first`/`last`.
///
/// Caller must hold `bucket.lock`.
pub fn unlink<P>(bucket: &BucketHead, slots: &[Slot<P>], index: u32) {
    let s = slot(slots, index);
    let prev = s.prev.load(Relaxed);
    let next = s.next.load(Relaxed);

    if prev != SLOT_NONE {
        slot(slots, prev).next.store(next, Relaxed);
    } else {
        bucket.first.store(next, Relaxed);
    }

    if next != SLOT_NONE {
        slot(slots, next).prev.store(prev, Relaxed);
    } else {
        bucket.last.store(prev, Relaxed);
    }

    s.prev.store(SLOT_NONE, Relaxed);
    s.next.store(SLOT_NONE, Relaxed);
    bucket.len.fetch_sub(1, Relaxed);
}

/// Iterate the slot indices of a bucket chain from head to tail.
///
/// The successor is read before the current index is yielded, so the
/// yielded slot may be unlinked without breaking the walk.
///
/// Caller must hold `bucket.lock` for the whole iteration.
pub fn chain<'a, P>(bucket: &BucketHead, slots: &'a [Slot<P>]) -> Chain<'a, P> {
    Chain {
        slots,
        cursor: bucket.first.load(Relaxed),
    }
}

pub struct Chain<'a, P> {
    slots: &'a [Slot<P>],
    cursor: u32,
}

impl<P> Iterator for Chain<'_, P> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == SLOT_NONE {
            return None;
        }
        let index = self.cursor;
        self.cursor = slot(self.slots, index).next.load(Relaxed);
        Some(index)
    }
}

/// Thread every slot onto the free list: `0 -> 1 -> ... -> n-1`.
///
/// Only valid on a region nobody else can see yet.
pub fn init_free_list<P>(header: &Header, slots: &[Slot<P>]) {
    let n = slots.len();
    for (i, s) in slots.iter().enumerate() {
        s.bucket.store(SLOT_NONE, Relaxed);
        s.prev.store(SLOT_NONE, Relaxed);
        s.next
            .store(if i + 1 < n { (i + 1) as u32 } else { SLOT_NONE }, Relaxed);
        s.state.store(SLOT_FREE, Relaxed);
    }
    header
        .free_head
        .store(if n > 0 { 0 } else { SLOT_NONE }, Relaxed);
    header.slots_in_use.store(0, Relaxed);
}

/// Pop a slot off the free list.
///
/// Caller must hold `header.alloc_lock`.
pub fn pop_free<P>(header: &Header, slots: &[Slot<P>]) -> Option<u32> {
    let index = header.free_head.load(Relaxed);
    if index == SLOT_NONE {
        return None;
    }
    let s = slot(slots, index);
    header.free_head.store(s.next.load(Relaxed), Relaxed);
    s.next.store(SLOT_NONE, Relaxed);
    header.slots_in_use.fetch_add(1, Relaxed);
    Some(index)
}

/// Push a slot back onto the free list.
///
/// Caller must hold `header.alloc_lock`, and the slot's payload must already
/// have been moved out.
pub fn push_free<P>(header: &Header, slots: &[Slot<P>], index: u32) {
    let s = slot(slots, index);
    s.state.store(SLOT_FREE, Relaxed);
    s.generation.fetch_add(1, Relaxed);
    s.bucket.store(SLOT_NONE, Relaxed);
    s.prev.store(SLOT_NONE, Relaxed);
    s.next.store(header.free_head.load(Relaxed), Relaxed);
    header.free_head.store(index, Relaxed);
    header.slots_in_use.fetch_sub(1, Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::layout::SLOT_LINKED;
    use crate::shm::lock::ShmSpinLock;
    use std::cell::UnsafeCell;
    use std::mem::MaybeUninit;
    use std::sync::atomic::AtomicU32;

    fn make_slots(n: usize) -> Vec<Slot<()>> {
        (0..n)
            .map(|_| Slot {
                bucket: AtomicU32::new(SLOT_NONE),
                prev: AtomicU32::new(SLOT_NONE),
                next: AtomicU32::new(SLOT_NONE),
                state: AtomicU32::new(SLOT_LINKED),
                generation: AtomicU32::new(0),
                payload: UnsafeCell::new(MaybeUninit::new(())),
            })
            .collect()
    }

    fn make_bucket() -> BucketHead {
        BucketHead {
            lock: ShmSpinLock::new(),
            first: AtomicU32::new(SLOT_NONE),
            last: AtomicU32::new(SLOT_NONE),
            len: AtomicU32::new(0),
        }
    }

    fn make_header() -> Box<Header> {
        // Header is plain data; an all-zero header is a valid starting point.
        Box::new(unsafe { std::mem::zeroed() })
    }

    fn collect<P>(bucket: &BucketHead, slots: &[Slot<P>]) -> Vec<u32> {
        chain(bucket, slots).collect()
    }

    #[test]
    fn append_preserves_insertion_order() {
        let slots = make_slots(4);
        let bucket = make_bucket();
        assert!(bucket.is_empty());

        for i in [2, 0, 3] {
            push_tail(&bucket, &slots, i);
        }

        assert_eq!(collect(&bucket, &slots), vec![2, 0, 3]);
        assert_eq!(bucket.first.load(Relaxed), 2);
        assert_eq!(bucket.last.load(Relaxed), 3);
        assert_eq!(bucket.len.load(Relaxed), 3);
    }

    #[test]
    fn unlink_head_middle_tail() {
        let slots = make_slots(5);
        let bucket = make_bucket();
        for i in 0..5 {
            push_tail(&bucket, &slots, i);
        }

        unlink(&bucket, &slots, 2);
        assert_eq!(collect(&bucket, &slots), vec![0, 1, 3, 4]);

        unlink(&bucket, &slots, 0);
        assert_eq!(collect(&bucket, &slots), vec![1, 3, 4]);
        assert_eq!(bucket.first.load(Relaxed), 1);

        unlink(&bucket, &slots, 4);
        assert_eq!(collect(&bucket, &slots), vec![1, 3]);
        assert_eq!(bucket.last.load(Relaxed), 3);

        unlink(&bucket, &slots, 1);
        unlink(&bucket, &slots, 3);
        assert!(bucket.is_empty());
        assert_eq!(bucket.last.load(Relaxed), SLOT_NONE);
        assert_eq!(bucket.len.load(Relaxed), 0);
    }

    #[test]
    fn chain_survives_unlinking_the_yielded_slot() {
        let slots = make_slots(4);
        let bucket = make_bucket();
        for i in 0..4 {
            push_tail(&bucket, &slots, i);
        }

        let mut seen = Vec::new();
        for index in chain(&bucket, &slots) {
            seen.push(index);
            if index % 2 == 0 {
                unlink(&bucket, &slots, index);
            }
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(collect(&bucket, &slots), vec![1, 3]);
    }

    #[test]
    fn free_list_round_trip() {
        let slots = make_slots(3);
        let header = make_header();
        init_free_list(&header, &slots);

        assert_eq!(pop_free(&header, &slots), Some(0));
        assert_eq!(pop_free(&header, &slots), Some(1));
        assert_eq!(pop_free(&header, &slots), Some(2));
        assert_eq!(pop_free(&header, &slots), None);
        assert_eq!(header.slots_in_use.load(Relaxed), 3);

        push_free(&header, &slots, 1);
        assert_eq!(slots[1].state.load(Relaxed), SLOT_FREE);
        assert_eq!(slots[1].generation.load(Relaxed), 1);
        assert_eq!(slots[0].generation.load(Relaxed), 0);
        assert_eq!(pop_free(&header, &slots), Some(1));
        assert_eq!(pop_free(&header, &slots), None);
    }
}
