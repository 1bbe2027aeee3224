//! Release fences returned by present.

use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use crate::core::errors::CoreError;
use crate::prelude::*;

/// Sync-file fd signalling that the hardware finished reading a buffer.
///
/// The fd is closed when the fence is dropped.
#[derive(Debug)]
pub struct ReleaseFence {
    fd: OwnedFd,
}

impl ReleaseFence {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// An eventfd that is already readable. Used by devices that complete
    /// synchronously.
    pub fn signaled() -> Result<Self> {
        Self::eventfd(1)
    }

    /// An eventfd that never becomes readable on its own.
    pub fn unsignaled() -> Result<Self> {
        Self::eventfd(0)
    }

    fn eventfd(initial: u32) -> Result<Self> {
        // SAFETY: eventfd has no memory-safety preconditions
        let fd = unsafe { libc::eventfd(initial, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }
        // SAFETY: fd was just created and is owned by nobody else
        Ok(Self::new(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Block until the fence signals or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;

            // SAFETY: pfd is a valid pollfd and we pass a count of one
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(CoreError::fence(format!("poll failed: {}", err)));
            }
            if ret == 0 {
                return Err(CoreError::fence(format!("timed out after {:?}", timeout)));
            }
            if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(CoreError::fence(format!("fd {} in error state", pfd.fd)));
            }
            return Ok(());
        }
    }

    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for ReleaseFence {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for ReleaseFence {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
