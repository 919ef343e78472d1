//! The bucketed, capacity-bounded table.
//!
//! A [`Table`] is a fixed array of buckets, each a locked intrusive chain of
//! items, plus a global item counter bounded by `item_limit`. Inserting into
//! a full table first evicts one item chosen by the table's
//! [`EvictionPolicy`]; [`Table::garbage_collect`] sweeps a sub-range of
//! buckets for items the policy calls garbage.
//!
//! Locking is two-tier: one spin lock per bucket guards its chain, and a
//! global count lock guards only `item_count`. The count lock is either
//! taken alone, or nested inside a bucket lock (removal paths); never the
//! other way round.
//!
//! Callers hash their own keys (see [`crate::hash`]); any `u32` is accepted
//! and reduced modulo the bucket count.
mod bucket;
mod builder;
mod evict;

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, AtomicU32, Ordering};

pub use bucket::{BucketGuard, ItemId};
pub use builder::{TableBuilder, DEFAULT_SLOT_HEADROOM};

use crate::error::{Error, InsertError, Result};
use crate::hash::bucket_of;
use crate::shm::layout::{
    BucketHead, Header, RegionLayout, Slot, HEADER_SIZE, MAGIC, SLOT_DETACHED, SLOT_FREE,
    SLOT_LINKED, SLOT_NONE, VERSION,
};
use crate::shm::{list, Arena, HeapArena, ShmSpinLock};
use crate::strategies::EvictionPolicy;

/// Point-in-time counters of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableStats {
    pub item_count: u32,
    pub item_limit: u32,
    pub bucket_count: u32,
    pub slots_in_use: u32,
    pub slot_count: u32,
}

/// A bucketed hash table of `P` payloads laid out in an [`Arena`].
///
/// Handles are cheap to share between threads (`&Table` is enough). Handles
/// in different processes that map the same [`ShmArena`](crate::ShmArena)
/// operate on the same items.
pub struct Table<P, S, A = HeapArena>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    arena: A,
    policy: S,
    base: NonNull<u8>,
    layout: RegionLayout,
    item_limit: u32,
    _payload: PhantomData<P>,
}

// All shared state lives in the region and is guarded by the bucket, count
// and alloc locks stored there. Payloads may be touched from any thread
// holding the right bucket lock, hence `P: Send`.
unsafe impl<P: Send, S: EvictionPolicy<P>, A: Arena> Send for Table<P, S, A> {}
unsafe impl<P: Send, S: EvictionPolicy<P>, A: Arena> Sync for Table<P, S, A> {}

impl<P, S, A> Table<P, S, A>
where
    P: Copy + Send,
    S: EvictionPolicy<P>,
    A: Arena,
{
    /// Join a table another handle (typically another process) laid out in
    /// `arena`.
    pub fn attach(arena: A, policy: S) -> Result<Self> {
        if arena.size() < HEADER_SIZE {
            return Err(Error::LayoutMismatch("region is smaller than a header"));
        }
        // Safety: the arena is at least HEADER_SIZE bytes and suitably aligned.
        let header = unsafe { arena.base().cast::<Header>().as_ref() };
        if header.magic != MAGIC {
            return Err(Error::LayoutMismatch("bad magic"));
        }
        fence(Ordering::Acquire);
        if header.version != VERSION {
            return Err(Error::LayoutMismatch("unsupported layout version"));
        }
        if header.payload_size as usize != size_of::<P>()
            || header.payload_align as usize != align_of::<P>()
        {
            return Err(Error::LayoutMismatch("payload type differs"));
        }
        if header.bucket_count == 0
            || header.item_limit == 0
            || header.slot_count < header.item_limit
            || header.slot_count >= SLOT_NONE
        {
            return Err(Error::LayoutMismatch("header describes no usable table"));
        }
        let layout = RegionLayout::new::<P>(header.bucket_count, header.slot_count)
            .ok_or(Error::LayoutMismatch("region does not fit the address space"))?;
        if layout.slot_size != header.slot_size as usize || arena.size() < layout.total_size {
            return Err(Error::LayoutMismatch("region is smaller than its table"));
        }

        let item_limit = header.item_limit;
        log::debug!(
            "attached table: {} buckets, item limit {item_limit}, {} slots",
            layout.bucket_count,
            layout.slot_count
        );
        Ok(Table {
            base: arena.base(),
            arena,
            policy,
            layout,
            item_limit,
            _payload: PhantomData,
        })
    }
}

#[cfg(not(target_os = "windows"))]
impl<P, S> Table<P, S, crate::shm::ShmArena>
where
    P: Copy + Send,
    S: EvictionPolicy<P>,
{
    /// Map the shared region `name` and join the table in it.
    pub fn attach_shared(name: &str, policy: S) -> Result<Self> {
        Self::attach(crate::shm::ShmArena::open(name)?, policy)
    }
}

impl<P, S, A> Table<P, S, A>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    /// Lay out a fresh table in `arena`. Nobody else may use the region
    /// until this returns.
    pub(crate) fn init(
        arena: A,
        bucket_count: u32,
        item_limit: u32,
        slot_count: u32,
        policy: S,
    ) -> Result<Self> {
        let layout = RegionLayout::new::<P>(bucket_count, slot_count)
            .ok_or(Error::InvalidConfig("region does not fit the address space"))?;
        if arena.size() < layout.total_size {
            return Err(Error::AllocationFailure("table region"));
        }
        let base = arena.base();

        // Safety: the arena is large enough for `layout`, aligned to
        // REGION_ALIGN (checked by the builder against Slot<P>), and not
        // visible to anyone else yet.
        unsafe {
            ptr::write(
                base.as_ptr() as *mut Header,
                Header {
                    magic: [0; 8],
                    version: VERSION,
                    bucket_count,
                    item_limit,
                    slot_count,
                    slot_size: layout.slot_size as u32,
                    payload_size: size_of::<P>() as u32,
                    payload_align: align_of::<P>() as u32,
                    count_lock: ShmSpinLock::new(),
                    item_count: AtomicU32::new(0),
                    alloc_lock: ShmSpinLock::new(),
                    free_head: AtomicU32::new(SLOT_NONE),
                    slots_in_use: AtomicU32::new(0),
                    _pad: [0; 72],
                },
            );

            let buckets = base.as_ptr().add(RegionLayout::buckets_offset()) as *mut BucketHead;
            for i in 0..bucket_count as usize {
                ptr::write(
                    buckets.add(i),
                    BucketHead {
                        lock: ShmSpinLock::new(),
                        first: AtomicU32::new(SLOT_NONE),
                        last: AtomicU32::new(SLOT_NONE),
                        len: AtomicU32::new(0),
                    },
                );
            }

            let slots = base.as_ptr().add(layout.slots_offset) as *mut Slot<P>;
            for i in 0..slot_count as usize {
                ptr::write(
                    slots.add(i),
                    Slot {
                        bucket: AtomicU32::new(SLOT_NONE),
                        prev: AtomicU32::new(SLOT_NONE),
                        next: AtomicU32::new(SLOT_NONE),
                        state: AtomicU32::new(SLOT_FREE),
                        generation: AtomicU32::new(0),
                        payload: UnsafeCell::new(MaybeUninit::uninit()),
                    },
                );
            }
        }

        let table = Table {
            arena,
            policy,
            base,
            layout,
            item_limit,
            _payload: PhantomData,
        };
        list::init_free_list(table.header(), table.slots());

        // Publish: attachers check the magic before anything else.
        fence(Ordering::Release);
        // Safety: header was fully written above.
        unsafe { ptr::write_volatile(base.as_ptr() as *mut [u8; 8], MAGIC) };

        log::debug!(
            "created table: {bucket_count} buckets, item limit {item_limit}, {slot_count} slots ({} bytes)",
            layout.total_size
        );
        Ok(table)
    }

    #[inline]
    fn header(&self) -> &Header {
        // Safety: the region starts with an initialized header.
        unsafe { self.base.cast::<Header>().as_ref() }
    }

    #[inline]
    fn buckets(&self) -> &[BucketHead] {
        // Safety: `layout.bucket_count` heads follow the header.
        unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(RegionLayout::buckets_offset()) as *const BucketHead,
                self.layout.bucket_count as usize,
            )
        }
    }

    #[inline]
    fn slots(&self) -> &[Slot<P>] {
        // Safety: `layout.slot_count` slots start at `slots_offset`.
        unsafe {
            std::slice::from_raw_parts(
                self.base.as_ptr().add(self.layout.slots_offset) as *const Slot<P>,
                self.layout.slot_count as usize,
            )
        }
    }

    /// # Safety
    /// The slot must hold an initialized payload, and the caller must hold
    /// the lock of the bucket it is linked in (or own it while detached).
    #[inline]
    unsafe fn payload_ref(&self, index: u32) -> &P {
        (*self.slots()[index as usize].payload.get()).assume_init_ref()
    }

    /// # Safety
    /// As [`payload_ref`](Self::payload_ref), and no other reference to the
    /// payload may be alive.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    unsafe fn payload_mut(&self, index: u32) -> &mut P {
        (*self.slots()[index as usize].payload.get()).assume_init_mut()
    }

    /// Take a free slot and move `payload` into it, detached from any chain.
    fn alloc_slot(&self, payload: P, bucket: usize) -> Result<u32, P> {
        let header = self.header();
        let index = {
            let _guard = header.alloc_lock.lock();
            list::pop_free(header, self.slots())
        };
        let Some(index) = index else {
            return Err(payload);
        };

        let slot = &self.slots()[index as usize];
        // Safety: the slot was just taken off the free list; nobody else
        // can reach it.
        unsafe { (*slot.payload.get()).write(payload) };
        slot.bucket.store(bucket as u32, Ordering::Relaxed);
        slot.state.store(SLOT_DETACHED, Ordering::Relaxed);
        Ok(index)
    }

    /// Unlink a slot from `bucket`, move its payload out and put the slot
    /// back on the free list. Does not touch `item_count`.
    ///
    /// Caller must hold `bucket.lock`, and the slot must be linked in it.
    fn detach(&self, bucket: &BucketHead, index: u32) -> P {
        list::unlink(bucket, self.slots(), index);
        let slot = &self.slots()[index as usize];
        slot.state.store(SLOT_DETACHED, Ordering::Relaxed);
        // Safety: the slot was linked, so its payload is initialized, and it
        // is no longer reachable from the chain.
        let payload = unsafe { (*slot.payload.get()).assume_init_read() };

        let header = self.header();
        let _guard = header.alloc_lock.lock();
        list::push_free(header, self.slots(), index);
        payload
    }

    /// Increment `item_count`, returning its previous value.
    fn count_up(&self) -> u32 {
        let header = self.header();
        let _guard = header.count_lock.lock();
        let count = header.item_count.load(Ordering::Relaxed);
        header.item_count.store(count + 1, Ordering::Relaxed);
        count
    }

    fn count_down(&self, n: u32) {
        let header = self.header();
        let _guard = header.count_lock.lock();
        let count = header.item_count.load(Ordering::Relaxed);
        debug_assert!(count >= n, "item count underflow");
        header.item_count.store(count.saturating_sub(n), Ordering::Relaxed);
    }

    fn locked_item_count(&self) -> u32 {
        let header = self.header();
        let _guard = header.count_lock.lock();
        header.item_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bucket_index(&self, hash: u32) -> usize {
        bucket_of(hash, self.layout.bucket_count as usize)
    }

    pub fn bucket_count(&self) -> usize {
        self.layout.bucket_count as usize
    }

    pub fn item_limit(&self) -> u32 {
        self.item_limit
    }

    /// Live items across all buckets.
    ///
    /// Read without the count lock: a capacity signal, not an exact figure
    /// while other inserts or removals are in flight.
    pub fn item_count(&self) -> u32 {
        self.header().item_count.load(Ordering::Relaxed)
    }

    /// Number of items chained in the bucket `hash` maps to.
    pub fn bucket_len(&self, hash: u32) -> usize {
        self.buckets()[self.bucket_index(hash)]
            .len
            .load(Ordering::Relaxed) as usize
    }

    pub fn stats(&self) -> TableStats {
        let header = self.header();
        TableStats {
            item_count: header.item_count.load(Ordering::Relaxed),
            item_limit: self.item_limit,
            bucket_count: self.layout.bucket_count,
            slots_in_use: header.slots_in_use.load(Ordering::Relaxed),
            slot_count: self.layout.slot_count,
        }
    }

    pub fn policy(&self) -> &S {
        &self.policy
    }

    pub fn arena(&self) -> &A {
        &self.arena
    }

    /// Store `payload` in the bucket `hash` maps to.
    ///
    /// The item is counted first; if the count was already at the limit, one
    /// item is evicted (possibly from this very bucket) before the new one is
    /// appended. Until that eviction completes a concurrent reader may see
    /// `item_limit + 1`. If the eviction finds nothing, because the only
    /// counted items are still being linked by other inserts, it is retried
    /// once this item is linked.
    ///
    /// Duplicate keys are not detected. Must not be called while holding a
    /// [`BucketGuard`] of the same table.
    pub fn insert(&self, payload: P, hash: u32) -> Result<(), InsertError<P>> {
        let index = self.bucket_index(hash);
        let slot = match self.alloc_slot(payload, index) {
            Ok(slot) => slot,
            Err(payload) => {
                log::warn!(
                    "table arena exhausted ({} slots), dropping insert into bucket {index}",
                    self.layout.slot_count
                );
                return Err(InsertError::new(payload));
            }
        };

        let settled = self.count_up() < self.item_limit || self.remove_least(index);

        {
            let bucket = &self.buckets()[index];
            let _guard = bucket.lock.lock();
            list::push_tail(bucket, self.slots(), slot);
            self.slots()[slot as usize]
                .state
                .store(SLOT_LINKED, Ordering::Relaxed);
        }

        // Every item counted so far may have been unlinked when the scan ran.
        // Now that ours is linked there is at least one candidate.
        if !settled && S::EVICTS {
            while self.locked_item_count() > self.item_limit {
                if !self.remove_least(index) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Look up the first item in bucket `hash` matching `needle` and run `f`
    /// on it while the bucket is locked.
    pub fn find<R>(&self, needle: &S::Needle, hash: u32, f: impl FnOnce(&P) -> R) -> Option<R> {
        let guard = self.lock_bucket(hash);
        let item = guard.find(needle)?;
        guard.payload(item).map(f)
    }

    pub fn contains(&self, needle: &S::Needle, hash: u32) -> bool {
        self.find(needle, hash, |_| ()).is_some()
    }

    /// Copy out the payload matching `needle`.
    pub fn get(&self, needle: &S::Needle, hash: u32) -> Option<P>
    where
        P: Clone,
    {
        self.find(needle, hash, P::clone)
    }

    /// Remove the first item matching `needle`, releasing its payload
    /// through the policy. Returns whether anything was removed.
    pub fn remove(&self, needle: &S::Needle, hash: u32) -> bool {
        let mut guard = self.lock_bucket(hash);
        match guard.find(needle) {
            Some(item) => guard.remove(item),
            None => false,
        }
    }

    /// Lock the bucket `hash` maps to for a sequence of operations.
    pub fn lock_bucket(&self, hash: u32) -> BucketGuard<'_, P, S, A> {
        BucketGuard::new(self, self.bucket_index(hash))
    }

    /// Lower `item_count` by `n`, for items taken out with
    /// [`BucketGuard::remove_uncounted`].
    pub fn discount(&self, n: u32) {
        if n > 0 {
            self.count_down(n);
        }
    }

    /// Release every item and reset the table to empty.
    ///
    /// Must not run concurrently with any other operation on the table,
    /// from any process.
    pub fn destroy(self) -> usize {
        self.release_all()
    }

    fn release_all(&self) -> usize {
        let mut released = 0;
        let mut payloads = Vec::new();
        for bucket in self.buckets() {
            {
                let _guard = bucket.lock.lock();
                payloads.extend(
                    list::chain(bucket, self.slots()).map(|item| self.detach(bucket, item)),
                );
            }
            released += payloads.len();
            for payload in payloads.drain(..) {
                self.policy.release(payload);
            }
        }

        let header = self.header();
        let _guard = header.count_lock.lock();
        header.item_count.store(0, Ordering::Relaxed);
        if released > 0 {
            log::debug!("released {released} items on teardown");
        }
        released
    }
}

impl<P, S, A> Drop for Table<P, S, A>
where
    S: EvictionPolicy<P>,
    A: Arena,
{
    fn drop(&mut self) {
        if self.arena.is_exclusive() {
            self.release_all();
        }
    }
}
