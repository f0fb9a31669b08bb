//! FNV-1a hashing for object placement
//!
//! The placement ring is keyed by 64-bit FNV-1a. The byte stream fed into
//! the hash is load-bearing: changing it moves every object, so both the
//! constants and the fold order are pinned here rather than delegated to a
//! general-purpose hashing crate.

use crate::types::ObjectId;

/// FNV-1a 64-bit offset basis
pub const FNV1A_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime
const FNV1A_64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fold `bytes` into the running hash state `hval`
#[must_use]
pub fn fnv1a_64(bytes: &[u8], hval: u64) -> u64 {
    bytes
        .iter()
        .fold(hval, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV1A_64_PRIME))
}

/// Hash an object identifier onto the ring keyspace
#[must_use]
pub fn oid_hash(oid: ObjectId) -> u64 {
    fnv1a_64(&oid.raw().to_le_bytes(), FNV1A_64_INIT)
}
