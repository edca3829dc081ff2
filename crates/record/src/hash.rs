//! Shard-key hashing primitives.
//!
//! Two hashes meet here and must not be conflated:
//! - the rolling record hash a [`crate::RecordBuilder`] folds while
//!   encoding, stored inside the finished record;
//! - the shard-key hash computed at plan time from filter values, which
//!   routes queries.
//!
//! Both share [`combine_hash`]; the shard-key side is a wire contract
//! that every implementation must reproduce byte-for-byte.

use std::collections::HashSet;

/// Seed for every hash fold.
pub const HASH_SEED: i32 = 7;

/// Stable 32-bit hash of a byte string (CRC-32, cast to `i32`).
pub fn hash32(bytes: &[u8]) -> i32 {
    crc32fast::hash(bytes) as i32
}

/// Fold one hash into an accumulator: `31 * h1 + h2`, wrapping.
pub fn combine_hash(h1: i32, h2: i32) -> i32 {
    h1.wrapping_mul(31).wrapping_add(h2)
}

/// Hash of one key-value pair: `31 * hash32(k) + hash32(v)`.
pub fn pair_hash(key: &str, value: &str) -> i32 {
    combine_hash(hash32(key.as_bytes()), hash32(value.as_bytes()))
}

/// Sort `pairs` in place by key UTF-8 bytes, then hash each pair.
///
/// The returned vector is index-aligned with the sorted `pairs`.
pub fn sort_and_compute_hashes(pairs: &mut [(String, String)]) -> Vec<i32> {
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    pairs.iter().map(|(k, v)| pair_hash(k, v)).collect()
}

/// Fold, from the seed, the hashes of pairs whose key is in `include`,
/// in sorted order.
///
/// Returns `None` unless every key in `include` was encountered exactly
/// once among `sorted_pairs`.
pub fn combine_hash_including(
    sorted_pairs: &[(String, String)],
    hashes: &[i32],
    include: &HashSet<String>,
) -> Option<i32> {
    let mut h = HASH_SEED;
    let mut matched = 0usize;
    let mut prev_key: Option<&str> = None;
    for (i, (key, _)) in sorted_pairs.iter().enumerate() {
        if !include.contains(key) {
            continue;
        }
        if prev_key == Some(key.as_str()) {
            return None;
        }
        h = combine_hash(h, hashes[i]);
        matched += 1;
        prev_key = Some(key.as_str());
    }
    (matched == include.len()).then_some(h)
}

/// Fold, from the seed, the hashes of pairs whose key is not in
/// `exclude`, in sorted order.
pub fn combine_hash_excluding(
    sorted_pairs: &[(String, String)],
    hashes: &[i32],
    exclude: &HashSet<String>,
) -> i32 {
    let mut h = HASH_SEED;
    for (i, (key, _)) in sorted_pairs.iter().enumerate() {
        if exclude.contains(key) {
            continue;
        }
        h = combine_hash(h, hashes[i]);
    }
    h
}

/// Routing hash of a full shard key.
///
/// `cols` and `vals` are positionally paired; the pair order does not
/// affect the result because hashing canonicalizes by sorted key. This
/// is the contract the planner routes on; keep it byte-for-byte stable.
///
/// Shard-key columns must be distinct; duplicate columns are a schema
/// configuration error.
pub fn shard_key_hash<C: AsRef<str>, V: AsRef<str>>(cols: &[C], vals: &[V]) -> i32 {
    debug_assert_eq!(cols.len(), vals.len());
    let mut pairs: Vec<(String, String)> = cols
        .iter()
        .zip(vals.iter())
        .map(|(c, v)| (c.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    let hashes = sort_and_compute_hashes(&mut pairs);
    let include: HashSet<String> = cols.iter().map(|c| c.as_ref().to_string()).collect();
    combine_hash_including(&pairs, &hashes, &include)
        .expect("shard key columns must be distinct")
}
