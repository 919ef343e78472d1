//! Raw byte-string hashing used to spread keys over table buckets.
//!
//! Keys are absorbed in big-endian 4-byte words, each folded in as
//! `v ^ (v >> 3)`, followed by one tail word built from the remaining
//! 0-3 bytes. The accumulator is finished with three shifted copies of
//! itself. Not cryptographic: a byte-for-byte comparison must always
//! confirm a match.

/// Absorb one key into the accumulator.
#[inline]
fn update(mut h: u32, key: &[u8]) -> u32 {
    let mut words = key.chunks_exact(4);
    for w in &mut words {
        let v = u32::from_be_bytes([w[0], w[1], w[2], w[3]]);
        h = h.wrapping_add(v ^ (v >> 3));
    }

    let v = words
        .remainder()
        .iter()
        .fold(0u32, |v, &b| (v << 8).wrapping_add(b as u32));
    h.wrapping_add(v ^ (v >> 3))
}

/// Same as [`update`] but every byte is ASCII-lowercased first.
#[inline]
fn update_case(mut h: u32, key: &[u8]) -> u32 {
    let mut words = key.chunks_exact(4);
    for w in &mut words {
        let v = u32::from_be_bytes([
            w[0].to_ascii_lowercase(),
            w[1].to_ascii_lowercase(),
            w[2].to_ascii_lowercase(),
            w[3].to_ascii_lowercase(),
        ]);
        h = h.wrapping_add(v ^ (v >> 3));
    }

    let v = words
        .remainder()
        .iter()
        .fold(0u32, |v, &b| (v << 8).wrapping_add(b.to_ascii_lowercase() as u32));
    h.wrapping_add(v ^ (v >> 3))
}

#[inline]
fn finish(h: u32) -> u32 {
    h.wrapping_add(h >> 11)
        .wrapping_add((h >> 13).wrapping_add(h >> 23))
}

/// Hash a single key.
#[inline]
pub fn hash1_raw(key: &[u8]) -> u32 {
    finish(update(0, key))
}

/// Hash a composite key made of two parts.
///
/// Each part is absorbed on its own (with its own tail word), so the
/// result does not depend on the order of the parts.
#[inline]
pub fn hash2_raw(first: &[u8], second: &[u8]) -> u32 {
    finish(update(update(0, first), second))
}

/// Hash a key ignoring ASCII case.
#[inline]
pub fn hash1_case_raw(key: &[u8]) -> u32 {
    finish(update_case(0, key))
}

/// Reduce a hash to a bucket index.
#[inline]
pub fn bucket_of(hash: u32, bucket_count: usize) -> usize {
    debug_assert!(bucket_count > 0);
    hash as usize % bucket_count
}
