use std::mem::align_of;

use crate::error::{Error, Result};
use crate::shm::layout::{payload_fits_alignment, RegionLayout, Slot, SLOT_NONE};
use crate::shm::{Arena, HeapArena};
use crate::strategies::EvictionPolicy;

use super::Table;

/// Spare item slots allocated beyond `item_limit` when no explicit arena
/// size is given. Covers inserts that are counted but whose eviction has not
/// run yet.
pub const DEFAULT_SLOT_HEADROOM: u32 = 64;

/// Builds a [`Table`].
///
/// ```
/// use sip_ttable::{Fifo, Table, TableBuilder};
/// # use sip_ttable::strategies::{Keyed, Sequenced};
/// # #[derive(Clone, Copy)] struct Item { key: u32, seq: u64 }
/// # impl Keyed for Item { type Key = u32; fn key(&self) -> &u32 { &self.key } }
/// # impl Sequenced for Item { fn sequence(&self) -> u64 { self.seq } }
///
/// let table: Table<Item, Fifo> = TableBuilder::new(64)
///     .item_limit(1_000)
///     .build(Fifo)
///     .unwrap();
/// assert_eq!(table.bucket_count(), 64);
/// ```
#[derive(Clone, Debug)]
pub struct TableBuilder {
    bucket_count: u32,
    item_limit: Option<u32>,
    arena_slots: Option<u32>,
}

impl TableBuilder {
    /// A table with `bucket_count` buckets and, unless set otherwise, an item
    /// limit of one item per bucket.
    pub fn new(bucket_count: u32) -> Self {
        TableBuilder {
            bucket_count,
            item_limit: None,
            arena_slots: None,
        }
    }

    /// Maximum number of items before inserts start evicting.
    pub fn item_limit(mut self, limit: u32) -> Self {
        self.item_limit = Some(limit);
        self
    }

    /// Item slots in the arena. Must be at least the item limit.
    pub fn arena_slots(mut self, slots: u32) -> Self {
        self.arena_slots = Some(slots);
        self
    }

    /// Validated `(bucket_count, item_limit, slot_count)`.
    fn resolve<P>(&self) -> Result<(u32, u32, u32)> {
        if self.bucket_count == 0 {
            return Err(Error::InvalidConfig("bucket count must be positive"));
        }
        let item_limit = self.item_limit.unwrap_or(self.bucket_count);
        if item_limit == 0 {
            return Err(Error::InvalidConfig("item limit must be positive"));
        }
        let slots = self.arena_slots.unwrap_or_else(|| {
            item_limit
                .saturating_add(DEFAULT_SLOT_HEADROOM)
                .min(SLOT_NONE - 1)
        });
        if slots < item_limit {
            return Err(Error::InvalidConfig("arena slots below item limit"));
        }
        if slots >= SLOT_NONE {
            return Err(Error::InvalidConfig("too many arena slots"));
        }
        if !payload_fits_alignment::<P>() {
            log::error!(
                "payload alignment {} exceeds the region alignment",
                align_of::<Slot<P>>()
            );
            return Err(Error::InvalidConfig("payload alignment too large"));
        }
        Ok((self.bucket_count, item_limit, slots))
    }

    /// Bytes a region needs to hold this table with payload type `P`.
    pub fn region_size<P>(&self) -> Result<usize> {
        let (buckets, _, slots) = self.resolve::<P>()?;
        RegionLayout::new::<P>(buckets, slots)
            .map(|layout| layout.total_size)
            .ok_or(Error::InvalidConfig("region does not fit the address space"))
    }

    /// Build a table private to this process.
    pub fn build<P, S>(self, policy: S) -> Result<Table<P, S, HeapArena>>
    where
        P: Send,
        S: EvictionPolicy<P>,
    {
        let (buckets, limit, slots) = self.resolve::<P>()?;
        let arena = HeapArena::with_size(self.region_size::<P>()?)?;
        Table::init(arena, buckets, limit, slots, policy)
    }

    /// Build a table in a caller-provided arena. The arena must be at least
    /// [`region_size`](Self::region_size) bytes.
    pub fn build_in<P, S, A>(self, arena: A, policy: S) -> Result<Table<P, S, A>>
    where
        P: Copy + Send,
        S: EvictionPolicy<P>,
        A: Arena,
    {
        let (buckets, limit, slots) = self.resolve::<P>()?;
        Table::init(arena, buckets, limit, slots, policy)
    }

    /// Create the shared region `name` and build a table in it. Other
    /// processes join with [`Table::attach_shared`].
    #[cfg(not(target_os = "windows"))]
    pub fn build_shared<P, S>(
        self,
        name: &str,
        policy: S,
    ) -> Result<Table<P, S, crate::shm::ShmArena>>
    where
        P: Copy + Send,
        S: EvictionPolicy<P>,
    {
        let arena = crate::shm::ShmArena::create(name, self.region_size::<P>()?)?;
        self.build_in(arena, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fifo;
    use crate::strategies::{Keyed, Sequenced};

    #[derive(Clone, Copy)]
    struct Item(u32);

    impl Keyed for Item {
        type Key = u32;

        fn key(&self) -> &u32 {
            &self.0
        }
    }

    impl Sequenced for Item {
        fn sequence(&self) -> u64 {
            self.0 as u64
        }
    }

    fn invalid(builder: TableBuilder) -> &'static str {
        match builder.build::<Item, _>(Fifo) {
            Err(Error::InvalidConfig(reason)) => reason,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("builder accepted an invalid configuration"),
        }
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert_eq!(invalid(TableBuilder::new(0)), "bucket count must be positive");
        assert_eq!(
            invalid(TableBuilder::new(4).item_limit(0)),
            "item limit must be positive"
        );
        assert_eq!(
            invalid(TableBuilder::new(4).item_limit(10).arena_slots(9)),
            "arena slots below item limit"
        );
    }

    #[test]
    fn defaults() {
        let table: Table<Item, Fifo> = TableBuilder::new(16).build(Fifo).unwrap();
        let stats = table.stats();
        assert_eq!(stats.bucket_count, 16);
        assert_eq!(stats.item_limit, 16);
        assert_eq!(stats.slot_count, 16 + DEFAULT_SLOT_HEADROOM);
        assert_eq!(stats.item_count, 0);
    }

    #[test]
    fn region_size_matches_layout() {
        let builder = TableBuilder::new(8).item_limit(4).arena_slots(4);
        let layout = RegionLayout::new::<Item>(8, 4).unwrap();
        assert_eq!(builder.region_size::<Item>().unwrap(), layout.total_size);
    }

    #[test]
    fn build_in_undersized_arena_fails() {
        let arena = HeapArena::with_size(256).unwrap();
        let err = TableBuilder::new(64).build_in::<Item, _, _>(arena, Fifo);
        assert!(matches!(err, Err(Error::AllocationFailure(_))));
    }

    #[test]
    fn build_in_then_attach() {
        use crate::table::tests::Shared;
        use std::sync::Arc;

        let builder = TableBuilder::new(4).item_limit(8);
        let heap = Arc::new(HeapArena::with_size(builder.region_size::<Item>().unwrap()).unwrap());
        let first = builder
            .build_in::<Item, _, _>(Shared(Arc::clone(&heap)), Fifo)
            .unwrap();
        first.insert(Item(7), 7).unwrap();

        let second = Table::<Item, Fifo, _>::attach(Shared(heap), Fifo).unwrap();
        assert!(second.contains(&7, 7));
        assert_eq!(second.item_limit(), 8);
        assert_eq!(second.item_count(), 1);
    }
}
