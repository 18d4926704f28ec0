//! Portable `poll(2)` backend.
//!
//! Keeps its own interest table and rebuilds the `pollfd` array on each wait,
//! scanning only up to the highest live descriptor.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_millis, Backend, FiredEvent};
use crate::ready::Ready;

pub struct PollBackend {
    interest: Vec<Ready>,
    pollfds: Vec<libc::pollfd>,
}

impl PollBackend {
    pub fn new(setsize: usize) -> Self {
        PollBackend {
            interest: vec![Ready::NONE; setsize],
            pollfds: Vec::new(),
        }
    }

    fn slot(&mut self, fd: RawFd) -> io::Result<&mut Ready> {
        usize::try_from(fd)
            .ok()
            .and_then(|idx| self.interest.get_mut(idx))
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
    }
}

impl Backend for PollBackend {
    fn register(&mut self, fd: RawFd, _old: Ready, new: Ready) -> io::Result<()> {
        *self.slot(fd)? = new;
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd, _old: Ready, new: Ready) -> io::Result<()> {
        *self.slot(fd)? = new;
        Ok(())
    }

    fn wait(
        &mut self,
        max_fd: Option<RawFd>,
        timeout: Option<Duration>,
        fired: &mut Vec<FiredEvent>,
    ) -> io::Result<()> {
        self.pollfds.clear();
        if let Some(max_fd) = max_fd {
            let upper = (max_fd as usize + 1).min(self.interest.len());
            for (fd, mask) in self.interest[..upper].iter().enumerate() {
                if mask.is_none() {
                    continue;
                }
                let mut events = 0;
                if mask.is_readable() {
                    events |= libc::POLLIN;
                }
                if mask.is_writable() {
                    events |= libc::POLLOUT;
                }
                self.pollfds.push(libc::pollfd {
                    fd: fd as RawFd,
                    events,
                    revents: 0,
                });
            }
        }

        // SAFETY: the pointer/length pair describes `self.pollfds`.
        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(());
        }

        for pfd in &self.pollfds {
            let mut ready = Ready::NONE;
            if pfd.revents & libc::POLLIN != 0 {
                ready |= Ready::READABLE;
            }
            if pfd.revents & libc::POLLOUT != 0 {
                ready |= Ready::WRITABLE;
            }
            if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
                ready |= Ready::ALL;
            }
            if !ready.is_none() {
                fired.push(FiredEvent { fd: pfd.fd, ready });
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
