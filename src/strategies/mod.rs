//! Eviction policies: the caller-supplied half of a table.
//!
//! A table never looks inside its payloads. Matching, "which of two items
//! matters less", garbage detection and payload release all go through an
//! [`EvictionPolicy`].
pub mod expiry;
pub mod fifo;
pub mod lfu;

pub use expiry::Expiry;
pub use fifo::Fifo;
pub use lfu::LeastUsed;

/// Outcome of comparing the current eviction candidate (`first`) with the
/// next item of the bucket (`second`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Least {
    /// `first` matters less; keep it and continue.
    First,
    /// `second` matters less; it becomes the candidate.
    Second,
    /// No preference; keep the candidate and continue.
    Equal,
    /// `first` is evictable no matter what else is in the bucket; stop scanning.
    FirstAbsolute,
    /// `second` is evictable no matter what else is in the bucket; it becomes
    /// the candidate and scanning stops.
    SecondAbsolute,
}

/// The callback set of a table.
///
/// `equals` is always required. Eviction is active only when
/// [`EVICTS`](Self::EVICTS) is `true` (then [`least`](Self::least) should be
/// overridden); the garbage-collection sweep only when
/// [`COLLECTS_GARBAGE`](Self::COLLECTS_GARBAGE) is `true`. A table whose
/// policy does not evict is allowed to grow past its item limit until the
/// arena runs out of slots.
///
/// Callbacks run under a bucket lock and must not touch the table.
pub trait EvictionPolicy<P>: Send + Sync {
    /// What [`Table::find`](crate::Table::find) is given to match against.
    type Needle: ?Sized;

    /// Per-pass context produced by [`begin_search`](Self::begin_search),
    /// e.g. a "now" timestamp.
    type Snapshot: Default;

    const EVICTS: bool = false;

    const COLLECTS_GARBAGE: bool = false;

    fn equals(&self, needle: &Self::Needle, payload: &P) -> bool;

    /// Called once at the start of every eviction and GC pass.
    fn begin_search(&self) -> Self::Snapshot {
        Self::Snapshot::default()
    }

    fn least(&self, _snapshot: &Self::Snapshot, _first: &P, _second: &P) -> Least {
        Least::Equal
    }

    fn is_garbage(&self, _snapshot: &Self::Snapshot, _payload: &P) -> bool {
        false
    }

    /// Receives every payload the table lets go of (removal, eviction, GC,
    /// teardown), after it has been unlinked.
    fn release(&self, payload: P) {
        drop(payload);
    }
}

/// A payload identified by a key.
pub trait Keyed {
    type Key: ?Sized + PartialEq;

    fn key(&self) -> &Self::Key;
}

/// A payload stamped with a monotonically increasing insertion sequence.
pub trait Sequenced: Keyed {
    fn sequence(&self) -> u64;
}

/// A payload that stops being useful at a deadline, in clock seconds.
pub trait Expiring: Keyed {
    fn expires_at(&self) -> u64;
}

/// An expiring payload that also counts how often it was served.
pub trait Counted: Expiring {
    fn hits(&self) -> u64;
}

/// Order two values where the smaller one matters less.
#[inline]
pub(crate) fn smaller_is_least<T: Ord>(first: T, second: T) -> Least {
    match first.cmp(&second) {
        std::cmp::Ordering::Less => Least::First,
        std::cmp::Ordering::Greater => Least::Second,
        std::cmp::Ordering::Equal => Least::Equal,
    }
}
