//! Value fingerprinting: xxHash32 primary hash plus an 8-bit Pearson
//! signature.
//!
//! The primary hash selects the row (its low `bitWidth` bits form the
//! handex); the signature is stored next to each slot and lets the row scan
//! reject non-matches without touching the payload bytes.

use handex_types::Fingerprint;
use xxhash_rust::xxh32::xxh32;

/// Seed for the primary hash. Fixed so fingerprints are stable across
/// processes and store lifetimes.
const XXH32_SEED: u32 = 0;

/// Computes the fingerprint of a value's canonical bytes.
///
/// Implementations must be pure: the same bytes always produce the same
/// fingerprint, with no interior state.
pub trait Fingerprinter: Send + Sync {
    /// Fingerprint of `bytes`. The empty payload is the null value and must
    /// map to [`Fingerprint::NULL`].
    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint;
}

/// Default fingerprinter: xxHash32 (seed 0) + Pearson-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxPearson;

impl Fingerprinter for XxPearson {
    fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        if bytes.is_empty() {
            return Fingerprint::NULL;
        }
        Fingerprint {
            hash: xxh32(bytes, XXH32_SEED),
            signature: pearson8(bytes),
        }
    }
}

/// 8-bit Pearson hash over `bytes`.
#[inline]
#[must_use]
pub fn pearson8(bytes: &[u8]) -> u8 {
    let mut h = 0u8;
    for &b in bytes {
        h = PEARSON_TABLE[(h ^ b) as usize];
    }
    h
}

/// Pearson permutation table, built at compile time by shuffling the
/// identity permutation with a fixed xorshift stream.
static PEARSON_TABLE: [u8; 256] = pearson_table();

const fn pearson_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        table[i] = i as u8;
        i += 1;
    }
    // Fisher-Yates with xorshift32; the seed is arbitrary but must never change.
    let mut state: u32 = 0x9E37_79B9;
    let mut i = 255usize;
    while i > 0 {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let j = (state as usize) % (i + 1);
        let tmp = table[i];
        table[i] = table[j];
        table[j] = tmp;
        i -= 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_a_permutation() {
        let mut seen = [false; 256];
        for &b in &PEARSON_TABLE {
            assert!(!seen[b as usize], "duplicate table entry {b}");
            seen[b as usize] = true;
        }
    }

    #[test]
    fn null_value_fingerprint() {
        assert_eq!(XxPearson.fingerprint(b""), Fingerprint::NULL);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = XxPearson.fingerprint(b"hello");
        let b = XxPearson.fingerprint(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::NULL);
    }

    #[test]
    fn distinct_values_usually_differ() {
        let a = XxPearson.fingerprint(b"hello");
        let b = XxPearson.fingerprint(b"world");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn pearson_spreads_single_bytes() {
        // A permutation-based hash maps distinct single bytes to distinct
        // signatures.
        let mut seen = [false; 256];
        for b in 0..=255u8 {
            let sig = pearson8(&[b]);
            assert!(!seen[sig as usize]);
            seen[sig as usize] = true;
        }
    }
}
