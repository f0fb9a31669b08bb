//! Core type definitions for herdstore
//!
//! This module defines the fundamental identifier types and the on-disk
//! naming scheme for object files.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique 64-bit identifier of a stored object
///
/// Live copies are stored directly under a disk path as 16 lowercase hex
/// digits; in-progress writes carry a `.tmp` suffix; prior-epoch copies
/// live under the `.stale/` sub-area with the epoch appended.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Create from a raw 64-bit value
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw 64-bit value
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// File name of the live copy: 16 lowercase hex digits
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// File name of an in-progress write
    #[must_use]
    pub fn tmp_name(&self) -> String {
        format!("{:016x}.tmp", self.0)
    }

    /// Relative path of the copy retained for a prior epoch
    #[must_use]
    pub fn stale_name(&self, epoch: u32) -> String {
        format!(".stale/{:016x}.{}", self.0, epoch)
    }

    /// Parse the leading hex digits of a directory entry name.
    ///
    /// Returns `None` when the name carries no hex prefix, when the prefix
    /// overflows 64 bits, and for the reserved values 0 and `u64::MAX`.
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let len = name
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(name.len());
        if len == 0 || len > 16 {
            return None;
        }
        let raw = u64::from_str_radix(&name[..len], 16).ok()?;
        if raw == 0 || raw == u64::MAX {
            return None;
        }
        Some(Self(raw))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:016x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
