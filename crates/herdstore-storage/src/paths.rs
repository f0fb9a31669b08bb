//! Per-path storage-area protocol
//!
//! Every disk path owns a `.stale/` sub-area for prior-epoch object copies
//! and carries an extended attribute recording the live bytes observed at
//! initialization. Functions here operate on one path at a time; the
//! placement layer decides which paths to touch.

use herdstore_common::{Error, ObjectId, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extended attribute recording live object bytes at first initialization
pub const SIZE_XATTR: &str = "user.md.size";

/// Sub-directory holding prior-epoch object copies
pub const STALE_DIR: &str = ".stale";

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

fn xattr_name() -> io::Result<CString> {
    CString::new(SIZE_XATTR)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "attribute name"))
}

/// Read the size attribute from `path`. `Ok(None)` when the attribute is
/// absent.
pub fn get_size_xattr(path: &Path) -> io::Result<Option<u64>> {
    let cpath = cpath(path)?;
    let name = xattr_name()?;
    let mut buf = [0u8; 8];
    let ret = unsafe {
        libc::getxattr(
            cpath.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODATA) {
            return Ok(None);
        }
        return Err(err);
    }
    if ret as usize != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "short size attribute",
        ));
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

/// Persist the size attribute on `path` as a little-endian u64
pub fn set_size_xattr(path: &Path, size: u64) -> io::Result<()> {
    let cpath = cpath(path)?;
    let name = xattr_name()?;
    let bytes = size.to_le_bytes();
    let ret = unsafe {
        libc::setxattr(
            cpath.as_ptr(),
            name.as_ptr(),
            bytes.as_ptr().cast::<libc::c_void>(),
            bytes.len(),
            0,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Probe whether the filesystem backing `path` supports user extended
/// attributes
#[must_use]
pub fn xattr_supported(path: &Path) -> bool {
    match get_size_xattr(path) {
        Ok(_) => true,
        Err(err) => err.raw_os_error() != Some(libc::ENOTSUP),
    }
}

/// Free space on the filesystem backing `path` (fragment size times free
/// blocks)
pub fn free_space(path: &Path) -> io::Result<u64> {
    let cpath = cpath(path)?;
    let mut vfs = MaybeUninit::<libc::statvfs>::uninit();
    let ret = unsafe { libc::statvfs(cpath.as_ptr(), vfs.as_mut_ptr()) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    let vfs = unsafe { vfs.assume_init() };
    Ok(vfs.f_frsize as u64 * vfs.f_bfree as u64)
}

/// Absolute path of the live copy of `oid` under `dir`
#[must_use]
pub fn object_file(dir: &Path, oid: ObjectId) -> PathBuf {
    dir.join(oid.file_name())
}

/// Absolute path of the epoch-`epoch` stale copy of `oid` under `dir`
#[must_use]
pub fn stale_file(dir: &Path, oid: ObjectId, epoch: u32) -> PathBuf {
    dir.join(oid.stale_name(epoch))
}

/// True when `path` exists and can be stat'ed
#[must_use]
pub fn accessible(path: &Path) -> bool {
    fs::metadata(path).is_ok()
}

/// Visit every live object directly under `path`.
///
/// Temporary objects are never reported; with `cleanup` set they are
/// unlinked. Dot-prefixed entries and names without a usable hex prefix
/// are skipped. Stops at the first error returned by `f`.
pub fn for_each_object_in_path<F>(path: &Path, cleanup: bool, f: &mut F) -> Result<()>
where
    F: FnMut(ObjectId, &Path) -> Result<()>,
{
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to open storage path");
            return Err(Error::Eio);
        }
    };

    for entry in entries {
        let entry = entry.map_err(|_| Error::Eio)?;
        let name_os = entry.file_name();
        let Some(name) = name_os.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let Some(oid) = ObjectId::parse_file_name(name) else {
            continue;
        };

        // temporary objects are cleaned up, not reported
        if name.len() == 20 && name.ends_with(".tmp") {
            if cleanup {
                let tmp = path.join(name);
                debug!(object = %tmp.display(), "removing temporary object");
                let _ = fs::remove_file(&tmp);
            }
            continue;
        }

        f(oid, path)?;
    }
    Ok(())
}

/// Total bytes of live objects directly under `path`.
///
/// Objects unlinked between listing and stat are skipped.
pub fn sum_object_bytes(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    for_each_object_in_path(path, false, &mut |oid, dir| {
        if let Ok(meta) = fs::metadata(object_file(dir, oid)) {
            total += meta.len();
        }
        Ok(())
    })?;
    Ok(total)
}

/// Prepare `path` for use as a storage area and return the live byte count
/// recorded for it.
///
/// Verifies extended-attribute support, creates the `.stale/` sub-area,
/// and reads the size attribute, computing and persisting it when absent.
/// Any failure means the caller must drop the disk.
pub fn init_path(path: &Path) -> Result<u64> {
    if !xattr_supported(path) {
        warn!(
            path = %path.display(),
            "multi-disk support requires extended attributes"
        );
        return Err(Error::Eio);
    }

    fs::create_dir_all(path.join(STALE_DIR))?;

    if let Some(size) = get_size_xattr(path)? {
        return Ok(size);
    }

    let size = sum_object_bytes(path)?;
    set_size_xattr(path, size)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn put(dir: &Path, name: &str, contents: &[u8]) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn test_iteration_skips_and_cleans() {
        let dir = tempdir().unwrap();
        let path = dir.path();

        put(path, "00000000000000ab", b"live");
        put(path, "00000000000000cd.tmp", b"partial");
        put(path, ".hidden", b"dot");
        put(path, "not-an-object", b"junk");
        put(path, "ffffffffffffffff", b"reserved");

        let mut seen = Vec::new();
        for_each_object_in_path(path, true, &mut |oid, _| {
            seen.push(oid);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![ObjectId::new(0xab)]);
        assert!(!path.join("00000000000000cd.tmp").exists());
        assert!(path.join(".hidden").exists());
    }

    #[test]
    fn test_iteration_without_cleanup_keeps_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        put(path, "00000000000000cd.tmp", b"partial");

        let mut seen = Vec::new();
        for_each_object_in_path(path, false, &mut |oid, _| {
            seen.push(oid);
            Ok(())
        })
        .unwrap();

        assert!(seen.is_empty());
        assert!(path.join("00000000000000cd.tmp").exists());
    }

    #[test]
    fn test_iteration_stops_on_callback_error() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        put(path, "0000000000000001", b"a");
        put(path, "0000000000000002", b"b");

        let mut calls = 0;
        let err = for_each_object_in_path(path, false, &mut |_, _| {
            calls += 1;
            Err(Error::Eio)
        })
        .unwrap_err();

        assert!(matches!(err, Error::Eio));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_sum_object_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        put(path, "0000000000000001", b"12345");
        put(path, "0000000000000002", b"123");
        put(path, "00000000000000cd.tmp", b"ignored");

        assert_eq!(sum_object_bytes(path).unwrap(), 8);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone");
        let err = for_each_object_in_path(&gone, false, &mut |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Eio));
    }

    #[test]
    fn test_init_path_records_live_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        if !xattr_supported(path) {
            eprintln!("skipping: filesystem lacks user xattr support");
            return;
        }

        put(path, "0000000000000001", b"123456");

        let size = init_path(path).unwrap();
        assert_eq!(size, 6);
        assert!(path.join(STALE_DIR).is_dir());
        assert_eq!(get_size_xattr(path).unwrap(), Some(6));

        // the recorded value wins over a rescan
        put(path, "0000000000000002", b"more");
        assert_eq!(init_path(path).unwrap(), 6);
    }

    #[test]
    fn test_init_path_on_empty_dir_records_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path();
        if !xattr_supported(path) {
            eprintln!("skipping: filesystem lacks user xattr support");
            return;
        }

        assert_eq!(init_path(path).unwrap(), 0);
        assert_eq!(get_size_xattr(path).unwrap(), Some(0));
    }
}
