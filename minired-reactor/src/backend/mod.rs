//! # Readiness Backends
//!
//! Purpose: Hide the OS readiness primitive behind one small contract so the
//! event loop never branches on the platform.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `EventLoop` owns a `Box<dyn Backend>` chosen once
//!    at construction through `BackendKind`.
//! 2. **Mask Deltas**: Backends receive the mask before and after a change so
//!    `epoll` can pick ADD/MOD/DEL without keeping its own table.
//! 3. **Reusable Output**: `wait` appends into a caller-owned vector that the
//!    loop keeps between iterations.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::ready::Ready;

#[cfg(target_os = "linux")]
mod epoll;
mod poll;

#[cfg(target_os = "linux")]
pub use epoll::EpollBackend;
pub use poll::PollBackend;

/// One descriptor reported ready by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEvent {
    pub fd: RawFd,
    pub ready: Ready,
}

/// OS readiness primitive used by the event loop.
pub trait Backend {
    /// Adds interest. `old` is the registered mask before the change, `new`
    /// the union after it.
    fn register(&mut self, fd: RawFd, old: Ready, new: Ready) -> io::Result<()>;

    /// Removes interest. `new` is `NONE` when the descriptor is no longer watched.
    fn deregister(&mut self, fd: RawFd, old: Ready, new: Ready) -> io::Result<()>;

    /// Blocks until at least one descriptor is ready or `timeout` elapses
    /// (`None` waits indefinitely). `max_fd` is the highest descriptor with a
    /// live registration. An interrupted wait reports no events.
    fn wait(
        &mut self,
        max_fd: Option<RawFd>,
        timeout: Option<Duration>,
        fired: &mut Vec<FiredEvent>,
    ) -> io::Result<()>;

    fn name(&self) -> &'static str;
}

/// Available backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Linux `epoll`: cost proportional to ready descriptors.
    Epoll,
    /// Portable `poll(2)`: scans registrations up to the highest live descriptor.
    Poll,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            BackendKind::Epoll
        } else {
            BackendKind::Poll
        }
    }
}

impl BackendKind {
    /// Instantiates the backend for a slot table of `setsize` descriptors.
    pub fn create(self, setsize: usize) -> io::Result<Box<dyn Backend>> {
        match self {
            #[cfg(target_os = "linux")]
            BackendKind::Epoll => Ok(Box::new(EpollBackend::new(setsize)?)),
            #[cfg(not(target_os = "linux"))]
            BackendKind::Epoll => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "epoll is only available on linux",
            )),
            BackendKind::Poll => Ok(Box::new(PollBackend::new(setsize))),
        }
    }
}

/// Converts an optional wait into the millisecond argument of poll/epoll_wait.
///
/// Sub-millisecond remainders round up so a timer is never polled for early.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if d.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_millis(15))), 15);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1500))), 2);
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }

    #[test]
    fn default_kind_is_creatable() {
        let backend = BackendKind::default().create(16).expect("backend");
        assert!(!backend.name().is_empty());
    }
}
