use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use crate::event::EventSet;
use crate::time::Timestamp;

use super::{timeout_ms, Backend, BackendKind, SysEvent};

/// `poll(2)` backend: a dense pollfd array plus an fd → slot map so
/// interest changes stay O(1).
pub(crate) struct Poll {
    fds: Vec<libc::pollfd>,
    index: HashMap<RawFd, usize>,
}

pub(crate) fn create() -> io::Result<Box<dyn Backend>> {
    Ok(Box::new(Poll {
        fds: Vec::new(),
        index: HashMap::new(),
    }))
}

fn poll_bits(events: EventSet) -> libc::c_short {
    let mut bits = 0;
    if events.is_readable() {
        bits |= libc::POLLIN;
    }
    if events.is_writable() {
        bits |= libc::POLLOUT;
    }
    bits
}

impl Backend for Poll {
    fn kind(&self) -> BackendKind {
        BackendKind::Poll
    }

    fn fudge(&self) -> Timestamp {
        1e-3
    }

    fn modify(&mut self, fd: RawFd, _old: EventSet, new: EventSet) -> io::Result<()> {
        if new.is_empty() {
            if let Some(slot) = self.index.remove(&fd) {
                self.fds.swap_remove(slot);
                if let Some(moved) = self.fds.get(slot) {
                    self.index.insert(moved.fd, slot);
                }
            }
        } else {
            match self.index.get(&fd) {
                Some(&slot) => self.fds[slot].events = poll_bits(new),
                None => {
                    self.index.insert(fd, self.fds.len());
                    self.fds.push(libc::pollfd {
                        fd,
                        events: poll_bits(new),
                        revents: 0,
                    });
                }
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()> {
        let res = syscall!(poll(
            self.fds.as_mut_ptr(),
            self.fds.len() as libc::nfds_t,
            timeout_ms(timeout),
        ));

        match res {
            Ok(0) => Ok(()),
            Ok(_) => {
                for pfd in &self.fds {
                    if pfd.revents == 0 {
                        continue;
                    }
                    if pfd.revents & libc::POLLNVAL != 0 {
                        events.push(SysEvent::Stale { fd: pfd.fd });
                        continue;
                    }
                    let mut revents = EventSet::NONE;
                    if pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                        revents |= EventSet::READ;
                    }
                    if pfd.revents & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0 {
                        revents |= EventSet::WRITE;
                    }
                    events.push(SysEvent::Ready {
                        fd: pfd.fd,
                        revents,
                    });
                }
                Ok(())
            }
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => Ok(()),
            // EBADF and ENOMEM reach the loop, which scans or sheds
            // registered fds accordingly.
            Err(err) => Err(err),
        }
    }

    fn fork(&mut self) -> io::Result<()> {
        // Pure userspace state; it survives the fork as-is.
        Ok(())
    }
}
