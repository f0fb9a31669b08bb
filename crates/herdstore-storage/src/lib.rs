//! Herdstore Storage - multi-disk object placement
//!
//! This crate maps opaque object identifiers onto local storage paths
//! through a consistent-hash ring of virtual disks:
//! - Disks contribute hash points proportional to free space
//! - Each path carries a `.stale/` sub-area and a size attribute sidecar
//! - Disk failure evicts the path through the work-queue engine and kicks
//!   the recovery orchestrator
//! - Misplaced objects found during scans are renamed back to their
//!   hash-correct disk

pub mod multidisk;
pub mod paths;
pub mod ring;

pub use multidisk::{DiskInfo, MultiDisk, Recovery};
pub use ring::{Disk, Vdisk, DEFAULT_VDISKS};
