//! Linux `epoll` backend.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use super::{timeout_millis, Backend, FiredEvent};
use crate::ready::Ready;

pub struct EpollBackend {
    epfd: OwnedFd,
    events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new(setsize: usize) -> io::Result<Self> {
        // SAFETY: no pointers involved; the result is checked below.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by epoll_create1 and has no other owner.
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(EpollBackend {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; setsize.max(1)],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mask: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_bits(mask),
            u64: fd as u64,
        };
        // SAFETY: `event` outlives the call and epfd is a valid epoll instance.
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Backend for EpollBackend {
    fn register(&mut self, fd: RawFd, old: Ready, new: Ready) -> io::Result<()> {
        let op = if old.is_none() {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };
        self.ctl(op, fd, new)
    }

    fn deregister(&mut self, fd: RawFd, _old: Ready, new: Ready) -> io::Result<()> {
        if !new.is_none() {
            return self.ctl(libc::EPOLL_CTL_MOD, fd, new);
        }
        match self.ctl(libc::EPOLL_CTL_DEL, fd, Ready::NONE) {
            // The kernel drops closed descriptors from the set on its own.
            Err(err) if matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::ENOENT)) => Ok(()),
            other => other,
        }
    }

    fn wait(
        &mut self,
        _max_fd: Option<RawFd>,
        timeout: Option<Duration>,
        fired: &mut Vec<FiredEvent>,
    ) -> io::Result<()> {
        // SAFETY: the pointer/length pair describes `self.events`, which is
        // not touched again until the call returns.
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_millis(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for event in &self.events[..n as usize] {
            let bits = event.events;
            let fd = event.u64 as RawFd;
            let mut ready = Ready::NONE;
            if bits & libc::EPOLLIN as u32 != 0 {
                ready |= Ready::READABLE;
            }
            if bits & libc::EPOLLOUT as u32 != 0 {
                ready |= Ready::WRITABLE;
            }
            // Errors and hangups wake both directions so the owner observes EOF.
            if bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
                ready |= Ready::ALL;
            }
            fired.push(FiredEvent { fd, ready });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

fn interest_bits(mask: Ready) -> u32 {
    let mut bits = 0u32;
    if mask.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}
