//! A small process-local string map with a fixed number of buckets.
//!
//! Meant for configuration-time lookup tables (header names, parameter
//! names) that are filled once and then read. Duplicate keys are allowed;
//! lookups return the most recently added one.

use crate::error::{Error, Result};
use crate::hash::{bucket_of, hash1_case_raw};

struct StrEntry<V> {
    key: Box<[u8]>,
    value: V,
}

pub struct StrHashTable<V> {
    buckets: Box<[Vec<StrEntry<V>>]>,
    len: usize,
}

impl<V> StrHashTable<V> {
    pub fn with_size(bucket_count: usize) -> Result<Self> {
        if bucket_count == 0 {
            return Err(Error::InvalidConfig("bucket count must be positive"));
        }
        let buckets = (0..bucket_count).map(|_| Vec::new()).collect();
        Ok(StrHashTable { buckets, len: 0 })
    }

    // Buckets are picked by the case-folded hash so that exact and
    // case-insensitive lookups land in the same chain.
    fn bucket(&self, key: &[u8]) -> usize {
        bucket_of(hash1_case_raw(key), self.buckets.len())
    }

    pub fn add(&mut self, key: &[u8], value: V) {
        let index = self.bucket(key);
        self.buckets[index].push(StrEntry {
            key: key.into(),
            value,
        });
        self.len += 1;
    }

    fn lookup(&self, key: &[u8], eq: impl Fn(&[u8], &[u8]) -> bool) -> Option<&V> {
        self.buckets[self.bucket(key)]
            .iter()
            .rev()
            .find(|entry| eq(&entry.key[..], key))
            .map(|entry| &entry.value)
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.lookup(key, |a, b| a == b)
    }

    /// Look up ignoring ASCII case.
    pub fn get_case(&self, key: &[u8]) -> Option<&V> {
        self.lookup(key, <[u8]>::eq_ignore_ascii_case)
    }

    /// Remove the newest entry stored under exactly `key`.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let index = self.bucket(key);
        let chain = &mut self.buckets[index];
        let pos = chain.iter().rposition(|entry| &*entry.key == key)?;
        self.len -= 1;
        Some(chain.remove(pos).value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_case_insensitive_lookup() {
        let mut table = StrHashTable::with_size(16).unwrap();
        table.add(b"Via", 1);
        table.add(b"Call-ID", 2);

        assert_eq!(table.get(b"Via"), Some(&1));
        assert_eq!(table.get(b"via"), None);
        assert_eq!(table.get_case(b"VIA"), Some(&1));
        assert_eq!(table.get_case(b"call-id"), Some(&2));
        assert_eq!(table.get_case(b"From"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn newest_duplicate_wins() {
        let mut table = StrHashTable::with_size(1).unwrap();
        table.add(b"k", "old");
        table.add(b"k", "new");
        assert_eq!(table.get(b"k"), Some(&"new"));

        assert_eq!(table.remove(b"k"), Some("new"));
        assert_eq!(table.get(b"k"), Some(&"old"));
        assert_eq!(table.remove(b"k"), Some("old"));
        assert_eq!(table.remove(b"k"), None);
        assert!(table.is_empty());
    }

    #[test]
    fn zero_buckets_rejected() {
        assert!(matches!(
            StrHashTable::<()>::with_size(0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
