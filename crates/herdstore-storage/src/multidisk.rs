//! Multi-disk object placement
//!
//! Maps object identifiers onto local storage paths through the
//! consistent-hash ring, re-weighting and rebuilding the ring whenever the
//! disk set changes. I/O errors evict the faulty path asynchronously
//! through a dedicated work queue and kick the recovery orchestrator;
//! misplaced objects found during scans are renamed back to their
//! hash-correct disk.

use crate::paths;
use crate::ring::{build_ring, calculate_vdisks, vdisk_for_oid, Disk, Vdisk, DEFAULT_VDISKS};
use herdstore_common::{Error, ObjectId, Result};
use herdstore_wqueue::{completion, WorkQueue};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Recovery orchestrator entry point
pub trait Recovery: Send + Sync {
    /// Re-replicate objects against the current view after a placement
    /// change
    fn start_recovery(&self);
}

/// Per-disk report returned by [`MultiDisk::info`]
#[derive(Clone, Debug)]
pub struct DiskInfo {
    pub idx: usize,
    pub path: PathBuf,
    /// Free bytes on the backing filesystem
    pub free: u64,
    /// Bytes of live objects, computed by iterating the path
    pub used: u64,
}

struct MdState {
    disks: Vec<Disk>,
    ring: Vec<Vdisk>,
    total_space: u64,
}

struct MdInner {
    state: RwLock<MdState>,
    enabled: AtomicBool,
    /// Legacy single-disk object path, used while multi-disk is disabled
    obj_path: PathBuf,
    recovery: Arc<dyn Recovery>,
}

/// The multi-disk placement layer.
///
/// Cheap to clone; all clones share the same disk array and ring.
#[derive(Clone)]
pub struct MultiDisk {
    inner: Arc<MdInner>,
    /// Dedicated queue for disk eviction work
    recover_queue: WorkQueue,
}

impl MultiDisk {
    /// Build the placement layer over `disk_paths`.
    ///
    /// Paths that cannot be created or initialized are dropped up front.
    /// With `multidisk` unset or an empty path list, the layer stays
    /// disabled and every lookup resolves to `obj_path`.
    pub fn new(
        obj_path: PathBuf,
        disk_paths: &[PathBuf],
        multidisk: bool,
        recover_queue: WorkQueue,
        recovery: Arc<dyn Recovery>,
    ) -> Self {
        let inner = Arc::new(MdInner {
            state: RwLock::new(MdState {
                disks: Vec::new(),
                ring: Vec::new(),
                total_space: 0,
            }),
            enabled: AtomicBool::new(false),
            obj_path,
            recovery,
        });

        if multidisk && !disk_paths.is_empty() {
            let mut st = inner.state.write();
            for path in disk_paths {
                add_disk(&mut st.disks, path);
            }
            init_space(&mut st);
            let online = !st.disks.is_empty();
            drop(st);
            if online {
                inner.enabled.store(true, Ordering::Release);
            }
        }

        Self {
            inner,
            recover_queue,
        }
    }

    /// Whether the multi-disk layer is active
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Number of disks currently in the placement array
    #[must_use]
    pub fn nr_online_disks(&self) -> usize {
        self.inner.state.read().disks.len()
    }

    /// Aggregate free space observed by the last init pass
    #[must_use]
    pub fn total_space(&self) -> u64 {
        self.inner.state.read().total_space
    }

    /// Storage path holding the live copy of `oid`
    #[must_use]
    pub fn object_path(&self, oid: ObjectId) -> PathBuf {
        if !self.enabled() {
            return self.inner.obj_path.clone();
        }
        let st = self.inner.state.read();
        match vdisk_for_oid(&st.ring, oid) {
            Some(vd) => {
                let path = st.disks[usize::from(vd.idx)].path.clone();
                debug!(%oid, idx = vd.idx, path = %path.display(), "resolved object path");
                path
            }
            // every disk was unplugged; fall back to the legacy path
            None => self.inner.obj_path.clone(),
        }
    }

    /// True when a live copy of `oid` is present on any disk.
    ///
    /// A miss on the primary path triggers a full scan of the working
    /// directory; a copy found on the wrong disk is renamed to the
    /// hash-correct one on the way.
    #[must_use]
    pub fn exists(&self, oid: ObjectId) -> bool {
        let primary = paths::object_file(&self.object_path(oid), oid);
        if paths::accessible(&primary) {
            return true;
        }
        self.inner.scan_wd(oid, 0).is_ok()
    }

    /// Path of the epoch-`epoch` stale copy of `oid`, repairing placement
    /// on a primary miss. `epoch` must be nonzero.
    pub fn stale_path(&self, oid: ObjectId, epoch: u32) -> Result<PathBuf> {
        debug_assert!(epoch > 0);
        let primary = paths::stale_file(&self.object_path(oid), oid, epoch);
        if paths::accessible(&primary) {
            return Ok(primary);
        }
        if self.inner.scan_wd(oid, epoch).is_ok() {
            return Ok(primary);
        }
        Err(Error::NoObject(oid))
    }

    /// Visit every live object across the working directory
    pub fn for_each_object<F>(&self, cleanup: bool, mut f: F) -> Result<()>
    where
        F: FnMut(ObjectId, &Path) -> Result<()>,
    {
        if !self.enabled() {
            return paths::for_each_object_in_path(&self.inner.obj_path, cleanup, &mut f);
        }
        let st = self.inner.state.read();
        for disk in &st.disks {
            paths::for_each_object_in_path(&disk.path, cleanup, &mut f)?;
        }
        Ok(())
    }

    /// Visit each storage path root
    pub fn for_each_disk_path<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Path) -> Result<()>,
    {
        if !self.enabled() {
            return f(&self.inner.obj_path);
        }
        let st = self.inner.state.read();
        for disk in &st.disks {
            f(&disk.path)?;
        }
        Ok(())
    }

    /// Capacity report for every live disk
    #[must_use]
    pub fn info(&self) -> Vec<DiskInfo> {
        let st = self.inner.state.read();
        st.disks
            .iter()
            .enumerate()
            .map(|(idx, disk)| DiskInfo {
                idx,
                path: disk.path.clone(),
                free: paths::free_space(&disk.path).unwrap_or(0),
                used: paths::sum_object_bytes(&disk.path).unwrap_or(0),
            })
            .collect()
    }

    /// Add the comma-separated `paths` to the placement array
    pub fn plug(&self, paths: &str) -> Result<()> {
        self.do_plug_unplug(paths, true)
    }

    /// Remove the comma-separated `paths` from the placement array
    pub fn unplug(&self, paths: &str) -> Result<()> {
        self.do_plug_unplug(paths, false)
    }

    fn do_plug_unplug(&self, list: &str, plug: bool) -> Result<()> {
        let mut st = self.inner.state.write();
        let old_nr = st.disks.len();

        for path in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let path = Path::new(path);
            if plug {
                add_disk(&mut st.disks, path);
            } else {
                del_disk(&mut st.disks, path);
            }
        }

        // no disks changed: bail out
        if st.disks.len() == old_nr {
            return Err(Error::Unknown);
        }

        init_space(&mut st);
        // recover aggressively: the init pass may have dropped as many
        // disks as were just added
        if !st.disks.is_empty() {
            self.inner.recovery.start_recovery();
        }
        Ok(())
    }

    /// React to an I/O error on `fault_path`.
    ///
    /// Schedules eviction of the disk plus a recovery kick on the
    /// dedicated queue and returns the status the request handler should
    /// surface: `Network` invites the client to retry while recovery runs
    /// asynchronously, `Eio` means no replacement disk exists.
    pub fn handle_eio(&self, fault_path: &Path) -> Error {
        if !self.enabled() {
            return Error::Eio;
        }
        if self.nr_online_disks() <= 1 {
            return Error::Eio;
        }

        let inner = Arc::clone(&self.inner);
        let path = fault_path.to_path_buf();
        self.recover_queue
            .queue(completion(move || inner.do_recover(&path)));
        Error::Network
    }
}

impl MdInner {
    /// Walk every disk looking for a copy of `oid` and move it to its
    /// hash-correct location. Epoch 0 addresses live copies, any other
    /// value the matching stale copy.
    ///
    /// Repair renames files, so this takes the write side of the lock.
    fn scan_wd(&self, oid: ObjectId, epoch: u32) -> Result<()> {
        let st = self.state.write();
        for disk in &st.disks {
            if check_and_move(&st, oid, epoch, &disk.path).is_ok() {
                return Ok(());
            }
        }
        Err(Error::Eio)
    }

    fn do_recover(&self, fault_path: &Path) {
        let mut st = self.state.write();
        let Some(idx) = st.disks.iter().position(|d| d.path == fault_path) else {
            // duplicate report for a path that is already gone
            return;
        };
        if st.disks.len() <= 1 {
            // the final disk stays so lookups keep producing a
            // predictable error
            return;
        }

        remove_disk(&mut st.disks, idx);
        init_space(&mut st);
        if !st.disks.is_empty() {
            self.recovery.start_recovery();
        }
    }
}

fn add_disk(disks: &mut Vec<Disk>, path: &Path) {
    if disks.iter().any(|d| d.path == path) {
        warn!(path = %path.display(), "duplicate storage path");
        return;
    }
    if let Err(err) = fs::create_dir_all(path) {
        warn!(path = %path.display(), %err, "failed to create storage path");
        return;
    }
    disks.push(Disk::new(path.to_path_buf()));
    info!(path = %path.display(), nr_disks = disks.len(), "added storage path");
}

fn del_disk(disks: &mut Vec<Disk>, path: &Path) {
    match disks.iter().position(|d| d.path == path) {
        Some(idx) => remove_disk(disks, idx),
        None => warn!(path = %path.display(), "unknown storage path"),
    }
}

fn remove_disk(disks: &mut Vec<Disk>, idx: usize) {
    let disk = disks.remove(idx);
    info!(path = %disk.path.display(), "removed storage path from placement");
}

fn init_disk_space(path: &Path) -> Result<u64> {
    paths::init_path(path)?;
    Ok(paths::free_space(path)?)
}

/// Re-read free space, recompute weights, and rebuild the ring.
///
/// Disks whose initialization fails are dropped and the pass restarts.
/// The final disk is never dropped: it keeps the default point count so
/// lookups still resolve to a path whose I/O errors surface predictably.
fn init_space(st: &mut MdState) -> u64 {
    'reinit: loop {
        if st.disks.is_empty() {
            st.ring.clear();
            st.total_space = 0;
            return 0;
        }

        let mut total = 0u64;
        for idx in 0..st.disks.len() {
            let path = st.disks[idx].path.clone();
            match init_disk_space(&path) {
                Ok(space) => {
                    st.disks[idx].free_space = space;
                    total += space;
                }
                Err(err) if st.disks.len() == 1 => {
                    warn!(
                        path = %path.display(),
                        %err,
                        "last storage path is broken, keeping it for error signalling"
                    );
                    st.disks[0].free_space = 0;
                    st.disks[0].nr_vdisks = DEFAULT_VDISKS;
                    st.ring = build_ring(&st.disks);
                    st.total_space = 0;
                    return 0;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "dropping broken storage path");
                    remove_disk(&mut st.disks, idx);
                    continue 'reinit;
                }
            }
        }

        calculate_vdisks(&mut st.disks);
        st.ring = build_ring(&st.disks);
        st.total_space = total;
        return total;
    }
}

/// Move a copy of `oid` found under `from_dir` to its hash-correct disk.
/// Renaming a correctly placed copy onto itself is harmless and counts as
/// success.
fn check_and_move(st: &MdState, oid: ObjectId, epoch: u32, from_dir: &Path) -> Result<()> {
    let Some(vd) = vdisk_for_oid(&st.ring, oid) else {
        return Err(Error::Eio);
    };
    let target_dir = &st.disks[usize::from(vd.idx)].path;

    let (old, new) = if epoch == 0 {
        (
            paths::object_file(from_dir, oid),
            paths::object_file(target_dir, oid),
        )
    } else {
        (
            paths::stale_file(from_dir, oid, epoch),
            paths::stale_file(target_dir, oid, epoch),
        )
    };

    if !paths::accessible(&old) {
        return Err(Error::Eio);
    }
    if let Err(err) = fs::rename(&old, &new) {
        warn!(old = %old.display(), new = %new.display(), %err, "failed to move object");
        return Err(Error::Eio);
    }
    debug!(from = %old.display(), to = %new.display(), "moved object to canonical disk");
    Ok(())
}
