//! `#[repr(C)]` structures that live in the table region.
//!
//! ```text
//! +--------+------------------------+---------------------------------+
//! | Header | BucketHead x buckets   | Slot<P> x slots (item arena)    |
//! +--------+------------------------+---------------------------------+
//! ```
//!
//! Every cross-process link is a `u32` slot index, never a pointer, so the
//! region can be mapped at a different address in each process. Mutable
//! fields are atomics: the locks order the accesses, the atomics keep the
//! shared `&` access sound.

use std::cell::UnsafeCell;
use std::mem::{align_of, size_of, MaybeUninit};
use std::sync::atomic::{AtomicU32, Ordering};

use super::lock::ShmSpinLock;

/// Magic bytes at the start of the header to validate the mapping.
pub const MAGIC: [u8; 8] = *b"TTABLE01";

/// Layout version, bumped on any incompatible change.
pub const VERSION: u32 = 2;

/// Size of the fixed header at the start of the region.
pub const HEADER_SIZE: usize = 128;

/// Alignment every arena must guarantee for the region base.
pub const REGION_ALIGN: usize = 64;

/// Sentinel meaning "no slot" in list links and the free list.
pub const SLOT_NONE: u32 = u32::MAX;

/// Slot is on the free list.
pub const SLOT_FREE: u32 = 0;
/// Slot is linked into a bucket and counted in `item_count`.
pub const SLOT_LINKED: u32 = 1;
/// Slot is allocated but not (yet, or no longer) reachable from a bucket.
pub const SLOT_DETACHED: u32 = 2;

/// Header lives at offset 0 of the region.
#[repr(C)]
#[derive(Debug)]
pub struct Header {
    pub magic: [u8; 8], // 0..8

    // Immutable after creation
    pub version: u32,       // 8..12
    pub bucket_count: u32,  // 12..16
    pub item_limit: u32,    // 16..20
    pub slot_count: u32,    // 20..24
    pub slot_size: u32,     // 24..28
    pub payload_size: u32,  // 28..32
    pub payload_align: u32, // 32..36

    // Guarded by `count_lock`
    pub count_lock: ShmSpinLock, // 36..40
    pub item_count: AtomicU32,   // 40..44

    // Guarded by `alloc_lock`
    pub alloc_lock: ShmSpinLock, // 44..48
    pub free_head: AtomicU32,    // 48..52
    pub slots_in_use: AtomicU32, // 52..56

    pub _pad: [u8; 72],
}

const _: () = assert!(size_of::<Header>() == HEADER_SIZE);

/// One bucket: the head/tail of an intrusive item chain plus its lock.
#[repr(C)]
#[derive(Debug)]
pub struct BucketHead {
    pub lock: ShmSpinLock,
    pub first: AtomicU32,
    pub last: AtomicU32,
    pub len: AtomicU32,
}

impl BucketHead {
    pub const SIZE: usize = size_of::<Self>();

    pub fn is_empty(&self) -> bool {
        self.first.load(Ordering::Relaxed) == SLOT_NONE
    }
}

const _: () = assert!(size_of::<BucketHead>() == 16);

/// One item slot in the arena. The payload is only initialized while the
/// slot is not on the free list.
#[repr(C)]
pub struct Slot<P> {
    pub bucket: AtomicU32,
    pub prev: AtomicU32,
    /// Chain successor while linked, free-list successor while free.
    pub next: AtomicU32,
    pub state: AtomicU32,
    /// Bumped each time the slot is freed, so item ids of a previous
    /// occupant no longer match.
    pub generation: AtomicU32,
    pub payload: UnsafeCell<MaybeUninit<P>>,
}

/// Sizes and offsets of a region holding `Slot<P>` items.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionLayout {
    pub bucket_count: u32,
    pub slot_count: u32,
    pub slot_size: usize,
    pub slots_offset: usize,
    pub total_size: usize,
}

impl RegionLayout {
    /// Compute the layout, or `None` if it would overflow `usize`.
    pub fn new<P>(bucket_count: u32, slot_count: u32) -> Option<Self> {
        let slot_size = size_of::<Slot<P>>();
        let buckets_end = (bucket_count as usize)
            .checked_mul(BucketHead::SIZE)?
            .checked_add(HEADER_SIZE)?;
        let slots_offset = align_up(buckets_end, align_of::<Slot<P>>())?;
        let total_size = (slot_count as usize)
            .checked_mul(slot_size)?
            .checked_add(slots_offset)?;
        Some(RegionLayout {
            bucket_count,
            slot_count,
            slot_size,
            slots_offset,
            total_size,
        })
    }

    /// Offset of the bucket array from the start of the region.
    pub const fn buckets_offset() -> usize {
        HEADER_SIZE
    }
}

/// Whether `Slot<P>` can be placed in a region aligned to [`REGION_ALIGN`].
pub const fn payload_fits_alignment<P>() -> bool {
    align_of::<Slot<P>>() <= REGION_ALIGN
}

fn align_up(offset: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(offset.checked_add(align - 1)? & !(align - 1))
}
