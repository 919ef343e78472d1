//! Bucketed, capacity-bounded hash tables that can live in memory shared by
//! several worker processes.
//!
//! A [`Table`] stores caller-defined payloads in a fixed number of buckets,
//! each guarded by its own lock. The caller hashes keys (see [`hash`]) and
//! supplies an [`EvictionPolicy`] that decides equality, which item matters
//! least when the table is full, and which items are garbage.
//!
//! On top of the table sit two ready-made stores used by SIP identity
//! verification: a Call-ID [`ReplayGuard`] and a certificate [`CertCache`].
pub mod callid;
pub mod certs;
pub mod clock;
pub mod error;
pub mod hash;
pub mod inline;
pub mod shm;
pub mod str_hash;
pub mod strategies;
pub mod sweeper;
pub mod table;

pub use callid::{ReplayConfig, ReplayGuard, Verdict};
pub use certs::{CertCache, CertConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, InsertError, Result};
pub use inline::InlineStr;
pub use shm::{Arena, HeapArena};
#[cfg(not(target_os = "windows"))]
pub use shm::ShmArena;
pub use str_hash::StrHashTable;
pub use strategies::{EvictionPolicy, Expiry, Fifo, Least, LeastUsed};
pub use sweeper::{Collector, Sweeper};
pub use table::{BucketGuard, ItemId, Table, TableBuilder, TableStats};
