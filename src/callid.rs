//! Call-ID replay protection for identity verification.
//!
//! Every verified request leaves its (Call-ID, From-tag, CSeq) in a table
//! until the request's validity deadline passes. A request whose dialog was
//! already seen with the same or a higher CSeq is a replay.
//!
//! Entries are keyed by Call-ID. Forked requests share a Call-ID but carry
//! different From-tags, so each entry tracks up to [`MAX_DIALOGS`] dialogs.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::hash::hash1_raw;
use crate::inline::InlineStr;
use crate::shm::{Arena, HeapArena};
use crate::strategies::{Expiring, Expiry, Keyed};
use crate::sweeper::{Collector, Sweeper};
use crate::table::{Table, TableBuilder};

pub const MAX_CALL_ID_LEN: usize = 128;
pub const MAX_TAG_LEN: usize = 64;
pub const MAX_DIALOGS: usize = 4;

/// Sizing and timing of a [`ReplayGuard`].
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub bucket_count: u32,
    pub item_limit: u32,
    /// How long a verified request stays valid; also one full GC cycle.
    pub validity: Duration,
    pub gc_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            bucket_count: 8192,
            item_limit: 8192,
            validity: Duration::from_secs(3600),
            gc_interval: Duration::from_secs(5),
        }
    }
}

impl ReplayConfig {
    fn builder(&self) -> TableBuilder {
        TableBuilder::new(self.bucket_count).item_limit(self.item_limit)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dialog {
    from_tag: InlineStr<MAX_TAG_LEN>,
    cseq: u32,
}

impl Dialog {
    pub fn from_tag(&self) -> &[u8] {
        self.from_tag.as_bytes()
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }
}

/// One remembered Call-ID.
#[derive(Clone, Copy, Debug)]
pub struct CallIdEntry {
    call_id: InlineStr<MAX_CALL_ID_LEN>,
    valid_before: u64,
    dialogs: [Dialog; MAX_DIALOGS],
    dialog_count: u8,
}

impl CallIdEntry {
    fn new(call_id: &[u8], dialog: Dialog, valid_before: u64) -> Result<Self> {
        let call_id = InlineStr::new(call_id).ok_or(Error::KeyTooLong {
            len: call_id.len(),
            max: MAX_CALL_ID_LEN,
        })?;
        let mut dialogs = [Dialog::default(); MAX_DIALOGS];
        dialogs[0] = dialog;
        Ok(CallIdEntry {
            call_id,
            valid_before,
            dialogs,
            dialog_count: 1,
        })
    }

    pub fn call_id(&self) -> &[u8] {
        self.call_id.as_bytes()
    }

    pub fn valid_before(&self) -> u64 {
        self.valid_before
    }

    pub fn dialogs(&self) -> &[Dialog] {
        &self.dialogs[..self.dialog_count as usize]
    }

    /// Fold a new request into this entry.
    fn record(&mut self, dialog: Dialog, valid_before: u64) -> Result<Verdict> {
        let count = self.dialog_count as usize;
        if let Some(known) = self.dialogs[..count]
            .iter_mut()
            .find(|known| known.from_tag == dialog.from_tag)
        {
            if dialog.cseq <= known.cseq {
                return Ok(Verdict::Replayed);
            }
            known.cseq = dialog.cseq;
        } else if count == MAX_DIALOGS {
            return Err(Error::DialogLimit(MAX_DIALOGS));
        } else {
            self.dialogs[count] = dialog;
            self.dialog_count += 1;
        }
        self.valid_before = self.valid_before.max(valid_before);
        Ok(Verdict::Accepted)
    }
}

impl Keyed for CallIdEntry {
    type Key = [u8];

    fn key(&self) -> &[u8] {
        self.call_id.as_bytes()
    }
}

impl Expiring for CallIdEntry {
    fn expires_at(&self) -> u64 {
        self.valid_before
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Replayed,
}

/// Remembers recently verified requests and flags replays.
///
/// Under pressure the entry closest to its deadline makes room; expired
/// entries are swept by [`collect`](Self::collect) or a collector thread.
pub struct ReplayGuard<C: Clock = SystemClock, A: Arena = HeapArena> {
    table: Arc<Table<CallIdEntry, Expiry<C>, A>>,
    config: ReplayConfig,
    sweeper: Arc<parking_lot::Mutex<Sweeper>>,
}

impl<C: Clock + 'static> ReplayGuard<C, HeapArena> {
    pub fn new(config: ReplayConfig, clock: C) -> Result<Self> {
        let table = config.builder().build(Expiry::new(clock))?;
        Ok(Self::with_table(table, config))
    }
}

#[cfg(not(target_os = "windows"))]
impl<C: Clock + 'static> ReplayGuard<C, crate::shm::ShmArena> {
    /// Create the guard in the shared region `name`, for worker processes to
    /// [`attach_shared`](Self::attach_shared) to.
    pub fn create_shared(name: &str, config: ReplayConfig, clock: C) -> Result<Self> {
        let table = config.builder().build_shared(name, Expiry::new(clock))?;
        Ok(Self::with_table(table, config))
    }

    /// Join a guard created by another process. Sizing comes from the region;
    /// `config` only supplies the timing.
    pub fn attach_shared(name: &str, config: ReplayConfig, clock: C) -> Result<Self> {
        let table = Table::attach_shared(name, Expiry::new(clock))?;
        Ok(Self::with_table(table, config))
    }
}

impl<C: Clock + 'static, A: Arena + 'static> ReplayGuard<C, A> {
    fn with_table(table: Table<CallIdEntry, Expiry<C>, A>, config: ReplayConfig) -> Self {
        let sweeper =
            Sweeper::for_validity(table.bucket_count(), config.validity, config.gc_interval);
        ReplayGuard {
            table: Arc::new(table),
            config,
            sweeper: Arc::new(parking_lot::Mutex::new(sweeper)),
        }
    }

    /// Deadline of a request dated `date` (clock seconds).
    pub fn deadline(&self, date: u64) -> u64 {
        date.saturating_add(self.config.validity.as_secs())
    }

    /// Record a request and tell whether it is a replay.
    ///
    /// A new Call-ID, a new From-tag of a known Call-ID, or a higher CSeq
    /// within a known dialog is accepted and pushes the entry's deadline out
    /// to `valid_before` if that is later.
    pub fn check(
        &self,
        call_id: &[u8],
        from_tag: &[u8],
        cseq: u32,
        valid_before: u64,
    ) -> Result<Verdict> {
        if call_id.len() > MAX_CALL_ID_LEN {
            return Err(Error::KeyTooLong {
                len: call_id.len(),
                max: MAX_CALL_ID_LEN,
            });
        }
        let dialog = Dialog {
            from_tag: InlineStr::new(from_tag).ok_or(Error::KeyTooLong {
                len: from_tag.len(),
                max: MAX_TAG_LEN,
            })?,
            cseq,
        };
        let hash = hash1_raw(call_id);

        {
            let mut bucket = self.table.lock_bucket(hash);
            let found = bucket.find(call_id);
            if let Some(entry) = found.and_then(|item| bucket.payload_mut(item)) {
                let verdict = entry.record(dialog, valid_before)?;
                if verdict == Verdict::Replayed {
                    log::info!(
                        "replayed request: call-id {:?}, cseq {cseq}",
                        String::from_utf8_lossy(call_id)
                    );
                }
                return Ok(verdict);
            }
        }

        self.table
            .insert(CallIdEntry::new(call_id, dialog, valid_before)?, hash)?;
        Ok(Verdict::Accepted)
    }

    /// Copy out the entry of `call_id`, if remembered.
    pub fn lookup(&self, call_id: &[u8]) -> Option<CallIdEntry> {
        self.table.get(call_id, hash1_raw(call_id))
    }

    /// Sweep the next slice of the table for expired entries.
    pub fn collect(&self) -> usize {
        self.sweeper.lock().sweep(&*self.table)
    }

    /// Sweep the whole table on a background thread, one slice every
    /// `gc_interval`. The thread and [`collect`](Self::collect) advance the
    /// same cursor.
    pub fn spawn_collector(&self) -> Result<Collector> {
        Collector::spawn(
            Arc::clone(&self.table),
            Arc::clone(&self.sweeper),
            self.config.gc_interval,
        )
    }

    pub fn len(&self) -> usize {
        self.table.item_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table(&self) -> &Table<CallIdEntry, Expiry<C>, A> {
        &self.table
    }
}
