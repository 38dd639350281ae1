use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::event::EventSet;
use crate::time::Timestamp;

use super::{timeout_ms, Backend, BackendKind, SysEvent};

// Initial receive-array size; doubled whenever a poll fills it.
const INITIAL_NEVENT: usize = 64;

pub(crate) struct Epoll {
    ep: OwnedFd,
    events: Vec<libc::epoll_event>,
}

pub(crate) fn create() -> io::Result<Box<dyn Backend>> {
    let ep = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
    // SAFETY: `epoll_create1(2)` returned a valid fd.
    let ep = unsafe { OwnedFd::from_raw_fd(ep) };
    Ok(Box::new(Epoll {
        ep,
        events: Vec::with_capacity(INITIAL_NEVENT),
    }))
}

fn epoll_bits(events: EventSet) -> u32 {
    // Level-triggered on purpose: the loop re-polls an fd until its
    // watchers drained it.
    let mut bits = 0;
    if events.is_readable() {
        bits |= libc::EPOLLIN;
    }
    if events.is_writable() {
        bits |= libc::EPOLLOUT;
    }
    bits as u32
}

impl Backend for Epoll {
    fn kind(&self) -> BackendKind {
        BackendKind::Epoll
    }

    fn fudge(&self) -> Timestamp {
        1e-3
    }

    fn modify(&mut self, fd: RawFd, old: EventSet, new: EventSet) -> io::Result<()> {
        let op = if new.is_empty() {
            libc::EPOLL_CTL_DEL
        } else if old.is_empty() {
            libc::EPOLL_CTL_ADD
        } else {
            libc::EPOLL_CTL_MOD
        };

        let mut ev = libc::epoll_event {
            events: epoll_bits(new),
            u64: fd as u64,
        };

        let ep = self.ep.as_raw_fd();
        match syscall!(epoll_ctl(ep, op, fd, &mut ev)) {
            Ok(_) => Ok(()),
            // ENOENT means the kernel already forgot the fd (closed and
            // possibly reopened); a plain ADD restores the registration.
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) && !new.is_empty() => {
                syscall!(epoll_ctl(ep, libc::EPOLL_CTL_ADD, fd, &mut ev)).map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()> {
        self.events.clear();
        let n = match syscall!(epoll_wait(
            self.ep.as_raw_fd(),
            self.events.as_mut_ptr(),
            self.events.capacity() as libc::c_int,
            timeout_ms(timeout),
        )) {
            Ok(n) => n as usize,
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => return Ok(()),
            Err(err) => return Err(err),
        };
        // SAFETY: `epoll_wait(2)` initialised the first `n` entries.
        unsafe { self.events.set_len(n) };

        for ev in &self.events {
            let mut revents = EventSet::NONE;
            let bits = ev.events as libc::c_int;
            if bits & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) != 0 {
                revents |= EventSet::READ;
            }
            if bits & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) != 0 {
                revents |= EventSet::WRITE;
            }
            events.push(SysEvent::Ready {
                fd: ev.u64 as RawFd,
                revents,
            });
        }

        if n == self.events.capacity() {
            self.events.reserve(n);
        }
        Ok(())
    }

    fn fork(&mut self) -> io::Result<()> {
        let ep = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        // SAFETY: see `create`.
        self.ep = unsafe { OwnedFd::from_raw_fd(ep) };
        Ok(())
    }
}
