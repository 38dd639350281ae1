use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::event::EventSet;
use crate::time::Timestamp;

use super::{timeout_timespec, Backend, BackendKind, SysEvent};

const INITIAL_NEVENT: usize = 64;

// Type of the `nchanges` and `nevents` parameters in the `kevent` function.
#[cfg(not(target_os = "netbsd"))]
type Count = libc::c_int;
#[cfg(target_os = "netbsd")]
type Count = libc::size_t;

// Type of the `filter` field in the `kevent` structure.
#[cfg(any(target_os = "dragonfly", target_os = "freebsd", target_os = "openbsd"))]
type Filter = libc::c_short;
#[cfg(any(target_os = "macos", target_os = "ios"))]
type Filter = i16;
#[cfg(target_os = "netbsd")]
type Filter = u32;

macro_rules! kevent {
    ($id: expr, $filter: expr, $flags: expr) => {
        libc::kevent {
            ident: $id as libc::uintptr_t,
            filter: $filter as Filter,
            flags: $flags,
            ..unsafe { std::mem::zeroed() }
        }
    };
}

pub(crate) struct Kqueue {
    kq: OwnedFd,
    changes: Vec<libc::kevent>,
    events: Vec<libc::kevent>,
}

pub(crate) fn create() -> io::Result<Box<dyn Backend>> {
    let kq = syscall!(kqueue())?;
    // SAFETY: `kqueue(2)` returned a valid fd.
    let kq = unsafe { OwnedFd::from_raw_fd(kq) };
    syscall!(fcntl(kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;

    // Probe for the historically broken kqueue implementations: a change
    // on an invalid ident must come back as an EV_ERROR event rather than
    // fail wholesale. If it does not, report this backend unusable so the
    // selection falls through to poll.
    let probe = kevent!(usize::MAX, libc::EVFILT_READ, libc::EV_ADD);
    let mut receipt = kevent!(0, 0, 0);
    let ok = syscall!(kevent(
        kq.as_raw_fd(),
        &probe,
        1 as Count,
        &mut receipt,
        1 as Count,
        std::ptr::null(),
    ))
    .map(|n| n == 1 && receipt.ident == probe.ident && receipt.flags & libc::EV_ERROR != 0)
    .unwrap_or(false);
    if !ok {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "kqueue does not report per-event errors",
        ));
    }

    Ok(Box::new(Kqueue {
        kq,
        changes: Vec::new(),
        events: Vec::with_capacity(INITIAL_NEVENT),
    }))
}

impl Backend for Kqueue {
    fn kind(&self) -> BackendKind {
        BackendKind::Kqueue
    }

    fn fudge(&self) -> Timestamp {
        1e-3
    }

    fn modify(&mut self, fd: RawFd, old: EventSet, new: EventSet) -> io::Result<()> {
        // kqueue does not coalesce registrations across a close/reopen of
        // the same fd number, so a wanted filter is always (re-)added
        // instead of diffed against `old`.
        if new.is_readable() {
            self.changes
                .push(kevent!(fd, libc::EVFILT_READ, libc::EV_ADD));
        } else if old.is_readable() {
            self.changes
                .push(kevent!(fd, libc::EVFILT_READ, libc::EV_DELETE));
        }

        if new.is_writable() {
            self.changes
                .push(kevent!(fd, libc::EVFILT_WRITE, libc::EV_ADD));
        } else if old.is_writable() {
            self.changes
                .push(kevent!(fd, libc::EVFILT_WRITE, libc::EV_DELETE));
        }

        // Submitted in bulk by the next poll; per-change errors come back
        // as EV_ERROR events.
        Ok(())
    }

    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()> {
        let ts = timeout_timespec(timeout);

        let res = syscall!(kevent(
            self.kq.as_raw_fd(),
            self.changes.as_ptr(),
            self.changes.len() as Count,
            self.events.as_mut_ptr(),
            self.events.capacity() as Count,
            &ts,
        ));
        self.changes.clear();

        let n = match res {
            Ok(n) => n as usize,
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => return Ok(()),
            Err(err) => return Err(err),
        };
        // SAFETY: `kevent(2)` initialised the first `n` entries.
        unsafe { self.events.set_len(n) };

        for ev in &self.events {
            let fd = ev.ident as RawFd;
            if ev.flags & libc::EV_ERROR != 0 {
                match ev.data as i32 {
                    // EBADF: the fd was closed under us.
                    libc::EBADF => events.push(SysEvent::Stale { fd }),
                    // ENOENT: a delete raced a close/reopen; re-submit the
                    // interest we believe in.
                    libc::ENOENT => events.push(SysEvent::Rearm { fd }),
                    // EPIPE: registering a pipe end whose peer is already
                    // gone; readiness is still reported, nothing to do.
                    libc::EPIPE => {}
                    err => log::error!(
                        "kevent change on fd {} failed: {}",
                        fd,
                        io::Error::from_raw_os_error(err)
                    ),
                }
            } else {
                let revents = match ev.filter {
                    libc::EVFILT_READ => EventSet::READ,
                    libc::EVFILT_WRITE => EventSet::WRITE,
                    _ => EventSet::NONE,
                };
                if !revents.is_empty() {
                    events.push(SysEvent::Ready { fd, revents });
                }
            }
        }

        if n == self.events.capacity() {
            self.events.reserve(n);
        }
        Ok(())
    }

    fn fork(&mut self) -> io::Result<()> {
        // kqueue descriptors are not inherited across fork; build a fresh
        // one and drop any staged changes that refer to the old queue.
        let kq = syscall!(kqueue())?;
        // SAFETY: see `create`.
        self.kq = unsafe { OwnedFd::from_raw_fd(kq) };
        syscall!(fcntl(self.kq.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        self.changes.clear();
        Ok(())
    }
}
