use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use sip_ttable::strategies::{Expiring, Keyed, Sequenced};
use sip_ttable::{
    Error, EvictionPolicy, Expiry, Fifo, Least, ManualClock, Table, TableBuilder,
};

const NUM_THREADS: u32 = 8;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Item {
    key: u32,
    seq: u64,
}

impl Keyed for Item {
    type Key = u32;

    fn key(&self) -> &u32 {
        &self.key
    }
}

impl Sequenced for Item {
    fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Expiring for Item {
    fn expires_at(&self) -> u64 {
        self.seq
    }
}

fn item(key: u32, seq: u64) -> Item {
    Item { key, seq }
}

#[test]
fn full_table_evicts_from_first_non_empty_bucket() {
    init_logger();
    let table: Table<Item, Fifo> = TableBuilder::new(4).item_limit(2).build(Fifo).unwrap();

    table.insert(item(b'A' as u32, 1), 0).unwrap();
    table.insert(item(b'B' as u32, 2), 1).unwrap();
    assert_eq!(table.item_count(), 2);

    // Buckets 2 and 3 are empty, so the scan wraps to bucket 0.
    table.insert(item(b'C' as u32, 3), 2).unwrap();
    assert_eq!(table.item_count(), 2);
    assert!(!table.contains(&(b'A' as u32), 0));
    assert!(table.contains(&(b'B' as u32), 1));
    assert!(table.contains(&(b'C' as u32), 2));
}

#[test]
fn zero_item_limit_is_rejected() {
    let result: Result<Table<Item, Fifo>, _> = TableBuilder::new(4).item_limit(0).build(Fifo);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn single_bucket_evicts_exact_least() {
    let clock = ManualClock::new(0);
    let table: Table<Item, Expiry<ManualClock>> = TableBuilder::new(1)
        .item_limit(5)
        .build(Expiry::new(clock))
        .unwrap();

    let mut model: Vec<Item> = Vec::new();
    for key in 0..40u32 {
        // Distinct deadlines in a scrambled order.
        let deadline = 1_000 + ((key as u64 * 17) % 40);
        if model.len() == 5 {
            let (pos, _) = model
                .iter()
                .enumerate()
                .min_by_key(|(_, it)| it.seq)
                .unwrap();
            let victim = model.remove(pos);
            table.insert(item(key, deadline), 0).unwrap();
            assert!(!table.contains(&victim.key, 0), "{victim:?} should be gone");
        } else {
            table.insert(item(key, deadline), 0).unwrap();
        }
        model.push(item(key, deadline));

        assert_eq!(table.item_count() as usize, model.len());
        for it in &model {
            assert_eq!(table.get(&it.key, 0), Some(*it));
        }
    }
}

#[test]
fn capacity_holds_under_concurrent_inserts() {
    init_logger();
    const LIMIT: u32 = 64;
    const PER_THREAD: u32 = 2_000;

    let table: Arc<Table<Item, Fifo>> = Arc::new(
        TableBuilder::new(16)
            .item_limit(LIMIT)
            .build(Fifo)
            .unwrap(),
    );
    for key in 0..LIMIT {
        table.insert(item(key, key as u64), key).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let monitor = {
        let table = Arc::clone(&table);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut max_seen = 0;
            while !done.load(Ordering::Relaxed) {
                max_seen = max_seen.max(table.item_count());
                thread::yield_now();
            }
            max_seen
        })
    };

    let sequence = Arc::new(AtomicUsize::new(LIMIT as usize));
    let workers: Vec<_> = (0..NUM_THREADS)
        .map(|thread_id| {
            let table = Arc::clone(&table);
            let sequence = Arc::clone(&sequence);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = thread_id * PER_THREAD + i + LIMIT;
                    let seq = sequence.fetch_add(1, Ordering::Relaxed) as u64;
                    table.insert(item(key, seq), key.wrapping_mul(2_654_435_761)).unwrap();
                }
            })
        })
        .collect();
    workers.into_iter().for_each(|t| t.join().unwrap());
    done.store(true, Ordering::Relaxed);
    let max_seen = monitor.join().unwrap();

    let stats = table.stats();
    assert!(stats.item_count <= LIMIT, "{stats:?}");
    assert_eq!(stats.slots_in_use, stats.item_count);
    // Each in-flight insert may be counted before its eviction runs.
    assert!(max_seen <= LIMIT + NUM_THREADS, "observed {max_seen}");
}

#[test]
fn tiny_limit_settles_after_racing_inserts() {
    init_logger();
    const THREADS: u32 = 16;
    const PER_THREAD: u32 = 5_000;

    // With a limit of 1 most evictions run while the only counted items are
    // still unlinked, so the scan often comes back empty.
    let table: Arc<Table<Item, Fifo>> = Arc::new(
        TableBuilder::new(2)
            .item_limit(1)
            .arena_slots(1_000)
            .build(Fifo)
            .unwrap(),
    );
    let sequence = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS as usize));

    let workers: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let table = Arc::clone(&table);
            let sequence = Arc::clone(&sequence);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..PER_THREAD {
                    let seq = sequence.fetch_add(1, Ordering::Relaxed) as u64;
                    table.insert(item(thread_id, seq), i).unwrap();
                }
            })
        })
        .collect();
    workers.into_iter().for_each(|t| t.join().unwrap());

    let stats = table.stats();
    assert!(stats.item_count <= 1, "{stats:?}");
    assert_eq!(stats.slots_in_use, stats.item_count);
    let chained = table.bucket_len(0) + table.bucket_len(1);
    assert_eq!(chained as u32, stats.item_count);
}

#[test]
fn locked_bucket_does_not_block_other_buckets() {
    let table: Arc<Table<Item, Fifo>> =
        Arc::new(TableBuilder::new(4).item_limit(8).build(Fifo).unwrap());
    table.insert(item(0, 0), 0).unwrap();
    table.insert(item(1, 1), 1).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let holder = {
        let table = Arc::clone(&table);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let bucket = table.lock_bucket(0);
            barrier.wait();
            thread::sleep(Duration::from_millis(200));
            drop(bucket);
        })
    };

    barrier.wait();
    let start = Instant::now();
    assert!(table.contains(&1, 1));
    assert!(start.elapsed() < Duration::from_millis(100));

    // Bucket 0 itself waits for the holder.
    assert!(table.contains(&0, 0));
    assert!(start.elapsed() >= Duration::from_millis(150));
    holder.join().unwrap();
}

/// Counts every payload the table lets go of.
#[derive(Default)]
struct Counting {
    released: Arc<AtomicUsize>,
}

impl EvictionPolicy<Item> for Counting {
    type Needle = u32;
    type Snapshot = ();

    const EVICTS: bool = true;

    fn equals(&self, needle: &u32, payload: &Item) -> bool {
        payload.key == *needle
    }

    fn least(&self, _: &(), first: &Item, second: &Item) -> Least {
        if first.seq <= second.seq {
            Least::First
        } else {
            Least::Second
        }
    }

    fn release(&self, _payload: Item) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn every_payload_is_released_exactly_once() {
    let released = Arc::new(AtomicUsize::new(0));
    let table = TableBuilder::new(8)
        .item_limit(50)
        .build(Counting {
            released: Arc::clone(&released),
        })
        .unwrap();

    for key in 0..100 {
        table.insert(item(key, key as u64), key).unwrap();
    }
    for key in 60..70 {
        assert!(table.remove(&key, key));
    }
    // 50 evictions plus 10 removals so far.
    assert_eq!(released.load(Ordering::Relaxed), 60);

    assert_eq!(table.destroy(), 40);
    assert_eq!(released.load(Ordering::Relaxed), 100);
}

#[test]
fn gc_removes_exactly_the_expired_items() {
    let clock = ManualClock::new(0);
    let table: Table<Item, Expiry<ManualClock>> = TableBuilder::new(8)
        .item_limit(256)
        .build(Expiry::new(clock.clone()))
        .unwrap();
    for key in 0..100u32 {
        table.insert(item(key, key as u64), key.wrapping_mul(31)).unwrap();
    }

    clock.set(50);
    assert_eq!(table.garbage_collect_all(), 50);
    assert_eq!(table.item_count(), 50);
    for key in 0..100u32 {
        assert_eq!(table.contains(&key, key.wrapping_mul(31)), key >= 50, "key {key}");
    }
    assert_eq!(table.garbage_collect_all(), 0);
}
