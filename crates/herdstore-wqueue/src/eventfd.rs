//! Completion eventfd
//!
//! A single nonblocking event counter shared by every work queue in the
//! process. Workers write 1 per finished item; the completion thread reads
//! and discards the counter once per wakeup, so any number of finishes
//! between wakeups coalesce into one readable event.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

/// Owned wrapper around an `eventfd(2)` descriptor
pub struct CompletionFd {
    fd: RawFd,
}

impl CompletionFd {
    /// Create a new nonblocking event counter
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Add 1 to the counter, waking the completion thread.
    ///
    /// EAGAIN means the counter is saturated; a wakeup is already pending,
    /// so the notification is not lost.
    pub fn notify(&self) -> io::Result<()> {
        let value: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &value as *const u64 as *const libc::c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Read and discard the counter.
    ///
    /// Returns the number of notifications coalesced since the last drain,
    /// or 0 when none were pending.
    pub fn drain(&self) -> io::Result<u64> {
        let mut value: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut value as *mut u64 as *mut libc::c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(value)
    }
}

impl AsRawFd for CompletionFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for CompletionFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
