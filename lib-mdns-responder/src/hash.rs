//! A deterministic string hash for bucketing names.
//!
//! This is the classic ELF hash over the presentation form of a name.
//! The table sizes are primes chosen to keep the load factor small for
//! typical service populations (well under 100 records per responder);
//! collisions just chain within a bucket.

use mdns_types::protocol::types::DomainName;

/// Buckets in the query registry.
pub const QUERY_BUCKETS: usize = 108;

/// Buckets in the publication store.
pub const PUBLISH_BUCKETS: usize = 108;

/// Buckets in the cache.
pub const CACHE_BUCKETS: usize = 1009;

/// ELF-hash the presentation form of `name` (labels joined by dots,
/// dot-terminated).  Names are already normalised to lowercase, so
/// equal names hash equally.
pub fn name_hash(name: &DomainName) -> u32 {
    let mut h: u32 = 0;

    let mut step = |byte: u8| {
        h = (h << 4).wrapping_add(u32::from(byte));
        let g = h & 0xF000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    };

    for label in &name.labels {
        for &byte in label {
            step(byte);
        }
        if !label.is_empty() {
            step(b'.');
        }
    }

    h
}

/// The chain a name lives on in a table of `buckets` buckets.
pub fn bucket(name: &DomainName, buckets: usize) -> usize {
    name_hash(name) as usize % buckets
}
