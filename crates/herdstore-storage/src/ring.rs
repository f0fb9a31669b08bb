//! Consistent-hash ring of virtual disks
//!
//! Every disk contributes a number of hash points ("vdisks") proportional
//! to its free space; an object lands on the disk backing the lowest point
//! at or above its own hash, wrapping around the keyspace. The byte stream
//! fed into the point hashes is pinned: it must not change across
//! releases, or every stored object moves.

use herdstore_common::hash::{fnv1a_64, oid_hash, FNV1A_64_INIT};
use herdstore_common::ObjectId;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::debug;

/// Hash points contributed by a disk of exactly average size
pub const DEFAULT_VDISKS: u16 = 128;

/// A storage path participating in placement
#[derive(Clone, Debug)]
pub struct Disk {
    /// Root of the storage area
    pub path: PathBuf,
    /// Hash points this disk contributes to the ring
    pub nr_vdisks: u16,
    /// Free bytes observed by the last init pass
    pub free_space: u64,
}

impl Disk {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            nr_vdisks: 0,
            free_space: 0,
        }
    }
}

/// One hash point on the ring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vdisk {
    /// Position in the 64-bit keyspace
    pub id: u64,
    /// Index of the backing disk at ring-build time
    pub idx: u16,
}

/// Assign each disk a point count proportional to its free space.
///
/// The average is clamped to one byte so a set of completely full disks
/// still divides cleanly; such disks simply weight to zero points.
pub fn calculate_vdisks(disks: &mut [Disk]) {
    if disks.is_empty() {
        return;
    }
    let total: u64 = disks.iter().map(|d| d.free_space).sum();
    let avg = (total / disks.len() as u64).max(1);
    for disk in disks.iter_mut() {
        let factor = disk.free_space as f32 / avg as f32;
        disk.nr_vdisks = (f32::from(DEFAULT_VDISKS) * factor).round_ties_even() as u16;
        debug!(
            path = %disk.path.display(),
            nr_vdisks = disk.nr_vdisks,
            free_space = disk.free_space,
            "weighted disk"
        );
    }
}

/// Build the sorted ring from the disk array.
///
/// Point hashes for a disk fold the remaining-disk counter and the disk's
/// path bytes in reverse order into a running FNV-1a state, one point per
/// fold.
#[must_use]
pub fn build_ring(disks: &[Disk]) -> Vec<Vdisk> {
    let mut ring = Vec::with_capacity(disks.iter().map(|d| usize::from(d.nr_vdisks)).sum());
    for (idx, disk) in disks.iter().enumerate() {
        let remaining = (disks.len() - 1 - idx) as i32;
        let reversed: Vec<u8> = disk.path.as_os_str().as_bytes().iter().rev().copied().collect();
        let mut hval = FNV1A_64_INIT;
        for _ in 0..disk.nr_vdisks {
            hval = fnv1a_64(&remaining.to_le_bytes(), hval);
            hval = fnv1a_64(&reversed, hval);
            ring.push(Vdisk {
                id: hval,
                idx: idx as u16,
            });
        }
    }
    ring.sort_unstable_by_key(|vd| vd.id);
    ring
}

/// Ring point owning `oid`: the lowest entry with `id` at or above the
/// object's hash, wrapping to the first entry past the top of the
/// keyspace. `None` only for an empty ring.
#[must_use]
pub fn vdisk_for_oid(ring: &[Vdisk], oid: ObjectId) -> Option<&Vdisk> {
    if ring.is_empty() {
        return None;
    }
    let id = oid_hash(oid);
    let pos = ring.partition_point(|vd| vd.id < id);
    Some(&ring[if pos == ring.len() { 0 } else { pos }])
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn disk(path: &str, free_space: u64) -> Disk {
        Disk {
            path: PathBuf::from(path),
            nr_vdisks: 0,
            free_space,
        }
    }

    #[test]
    fn test_equal_disks_get_default_points() {
        let mut disks = vec![disk("/d0", GIB), disk("/d1", GIB)];
        calculate_vdisks(&mut disks);
        assert_eq!(disks[0].nr_vdisks, DEFAULT_VDISKS);
        assert_eq!(disks[1].nr_vdisks, DEFAULT_VDISKS);

        let ring = build_ring(&disks);
        assert_eq!(ring.len(), 256);
        assert!(ring.windows(2).all(|w| w[0].id <= w[1].id));
    }

    #[test]
    fn test_weighted_disks() {
        let mut disks = vec![disk("/d0", GIB), disk("/d1", 3 * GIB)];
        calculate_vdisks(&mut disks);
        assert!(disks[0].nr_vdisks.abs_diff(64) <= 1);
        assert!(disks[1].nr_vdisks.abs_diff(192) <= 1);
    }

    #[test]
    fn test_single_disk_gets_default_points() {
        let mut disks = vec![disk("/d0", 0)];
        calculate_vdisks(&mut disks);
        assert_eq!(disks[0].nr_vdisks, 0);

        let mut disks = vec![disk("/d0", 123)];
        calculate_vdisks(&mut disks);
        assert_eq!(disks[0].nr_vdisks, DEFAULT_VDISKS);
    }

    #[test]
    fn test_ring_is_deterministic() {
        let mut disks = vec![disk("/d0", GIB), disk("/d1", 2 * GIB), disk("/d2", GIB)];
        calculate_vdisks(&mut disks);
        let a = build_ring(&disks);
        let b = build_ring(&disks);
        assert_eq!(a, b);
    }

    #[test]
    fn test_lookup_is_stable_and_wraps() {
        let mut disks = vec![disk("/d0", GIB), disk("/d1", GIB)];
        calculate_vdisks(&mut disks);
        let ring = build_ring(&disks);

        for raw in 1..1000u64 {
            let oid = ObjectId::new(raw);
            let first = vdisk_for_oid(&ring, oid).unwrap().idx;
            let second = vdisk_for_oid(&ring, oid).unwrap().idx;
            assert_eq!(first, second);
        }

        assert!(vdisk_for_oid(&[], ObjectId::new(1)).is_none());
    }

    #[test]
    fn test_routing_tracks_weights() {
        let mut disks = vec![disk("/d0", GIB), disk("/d1", 3 * GIB)];
        calculate_vdisks(&mut disks);
        let ring = build_ring(&disks);
        let total_points: u64 = disks.iter().map(|d| u64::from(d.nr_vdisks)).sum();

        // xorshift64 keeps the sample deterministic
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        let mut hits = [0u64; 2];
        const SAMPLES: u64 = 100_000;
        for _ in 0..SAMPLES {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let vd = vdisk_for_oid(&ring, ObjectId::new(state)).unwrap();
            hits[usize::from(vd.idx)] += 1;
        }

        for (i, d) in disks.iter().enumerate() {
            let expected = u64::from(d.nr_vdisks) as f64 / total_points as f64;
            let observed = hits[i] as f64 / SAMPLES as f64;
            assert!(
                (observed - expected).abs() < 0.05,
                "disk {i}: observed {observed:.3}, expected {expected:.3}"
            );
        }
    }
}
