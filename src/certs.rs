//! Cache of downloaded signer certificates, keyed by Identity-Info URL.
//!
//! Fetching a certificate is expensive, so verified PEM blobs are kept
//! around. The table is tiny; when it is full an expired certificate is
//! dropped first, otherwise the one served least often.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::hash::hash1_raw;
use crate::inline::InlineStr;
use crate::shm::{Arena, HeapArena};
use crate::strategies::{Counted, Expiring, Keyed, LeastUsed};
use crate::table::{Table, TableBuilder};

pub const MAX_URL_LEN: usize = 256;
pub const MAX_PEM_LEN: usize = 4096;

#[derive(Clone, Debug)]
pub struct CertConfig {
    pub bucket_count: u32,
    pub item_limit: u32,
}

impl Default for CertConfig {
    fn default() -> Self {
        CertConfig {
            bucket_count: 32,
            item_limit: 2,
        }
    }
}

impl CertConfig {
    fn builder(&self) -> TableBuilder {
        TableBuilder::new(self.bucket_count).item_limit(self.item_limit)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CertEntry {
    url: InlineStr<MAX_URL_LEN>,
    pem: InlineStr<MAX_PEM_LEN>,
    not_after: u64,
    accessed: u64,
}

impl CertEntry {
    fn new(url: &[u8], pem: &[u8], not_after: u64) -> Result<Self> {
        Ok(CertEntry {
            url: InlineStr::new(url).ok_or(Error::KeyTooLong {
                len: url.len(),
                max: MAX_URL_LEN,
            })?,
            pem: InlineStr::new(pem).ok_or(Error::KeyTooLong {
                len: pem.len(),
                max: MAX_PEM_LEN,
            })?,
            not_after,
            accessed: 0,
        })
    }

    pub fn url(&self) -> &[u8] {
        self.url.as_bytes()
    }

    pub fn pem(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    /// Expiry of the certificate, in clock seconds.
    pub fn not_after(&self) -> u64 {
        self.not_after
    }

    /// How many times the cache served this certificate.
    pub fn hits(&self) -> u64 {
        self.accessed
    }
}

impl Keyed for CertEntry {
    type Key = [u8];

    fn key(&self) -> &[u8] {
        self.url.as_bytes()
    }
}

impl Expiring for CertEntry {
    fn expires_at(&self) -> u64 {
        self.not_after
    }
}

impl Counted for CertEntry {
    fn hits(&self) -> u64 {
        self.accessed
    }
}

pub struct CertCache<C: Clock = SystemClock, A: Arena = HeapArena> {
    table: Table<CertEntry, LeastUsed<C>, A>,
}

impl<C: Clock> CertCache<C, HeapArena> {
    pub fn new(config: CertConfig, clock: C) -> Result<Self> {
        Ok(CertCache {
            table: config.builder().build(LeastUsed::new(clock))?,
        })
    }
}

#[cfg(not(target_os = "windows"))]
impl<C: Clock> CertCache<C, crate::shm::ShmArena> {
    pub fn create_shared(name: &str, config: CertConfig, clock: C) -> Result<Self> {
        Ok(CertCache {
            table: config.builder().build_shared(name, LeastUsed::new(clock))?,
        })
    }

    pub fn attach_shared(name: &str, clock: C) -> Result<Self> {
        Ok(CertCache {
            table: Table::attach_shared(name, LeastUsed::new(clock))?,
        })
    }
}

impl<C: Clock, A: Arena> CertCache<C, A> {
    /// Copy out the certificate for `url`, counting the hit.
    pub fn get(&self, url: &[u8]) -> Option<CertEntry> {
        let mut bucket = self.table.lock_bucket(hash1_raw(url));
        let item = bucket.find(url)?;
        let entry = bucket.payload_mut(item)?;
        entry.accessed += 1;
        Some(*entry)
    }

    /// Cache a certificate unless `url` is already present. Returns whether
    /// it was stored.
    pub fn add(&self, url: &[u8], pem: &[u8], not_after: u64) -> Result<bool> {
        let entry = CertEntry::new(url, pem, not_after)?;
        let hash = hash1_raw(url);
        if self.table.contains(url, hash) {
            return Ok(false);
        }
        self.table.insert(entry, hash)?;
        log::debug!("cached certificate for {:?}", String::from_utf8_lossy(url));
        Ok(true)
    }

    pub fn remove(&self, url: &[u8]) -> bool {
        self.table.remove(url, hash1_raw(url))
    }

    pub fn len(&self) -> usize {
        self.table.item_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
