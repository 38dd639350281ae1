use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::event::EventSet;
use crate::time::Timestamp;

use super::{timeout_timespec, Backend, BackendKind, SysEvent};

const INITIAL_NEVENT: usize = 64;

/// Solaris/illumos event-port backend. The port drops its association with
/// an fd when it delivers an event, so delivery is inherently one-shot and
/// the loop re-arms every delivered fd.
pub(crate) struct Port {
    port: OwnedFd,
    events: Vec<libc::port_event>,
}

pub(crate) fn create() -> io::Result<Box<dyn Backend>> {
    let port = syscall!(port_create())?;
    // SAFETY: `port_create(3C)` returned a valid fd.
    let port = unsafe { OwnedFd::from_raw_fd(port) };
    syscall!(fcntl(port.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
    Ok(Box::new(Port {
        port,
        events: Vec::with_capacity(INITIAL_NEVENT),
    }))
}

impl Backend for Port {
    fn kind(&self) -> BackendKind {
        BackendKind::Port
    }

    fn fudge(&self) -> Timestamp {
        1e-3
    }

    fn modify(&mut self, fd: RawFd, old: EventSet, new: EventSet) -> io::Result<()> {
        if new.is_empty() {
            if !old.is_empty() {
                // The association may already be gone (delivery clears it);
                // nothing to clean up if so.
                let _ = syscall!(port_dissociate(
                    self.port.as_raw_fd(),
                    libc::PORT_SOURCE_FD,
                    fd as libc::uintptr_t,
                ));
            }
            return Ok(());
        }

        let mut bits = 0;
        if new.is_readable() {
            bits |= libc::POLLIN;
        }
        if new.is_writable() {
            bits |= libc::POLLOUT;
        }

        syscall!(port_associate(
            self.port.as_raw_fd(),
            libc::PORT_SOURCE_FD,
            fd as libc::uintptr_t,
            bits as libc::c_int,
            std::ptr::null_mut(),
        ))
        .map(|_| ())
    }

    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()> {
        let ts = timeout_timespec(timeout);
        let mut nget: libc::c_uint = 1;

        let res = syscall!(port_getn(
            self.port.as_raw_fd(),
            self.events.as_mut_ptr(),
            self.events.capacity() as libc::c_uint,
            &mut nget,
            &ts as *const _ as *mut _,
        ));

        match res {
            Ok(_) => {}
            Err(err)
                if err.raw_os_error() == Some(libc::EINTR)
                    || err.raw_os_error() == Some(libc::ETIME) =>
            {
                return Ok(())
            }
            Err(err) => return Err(err),
        }
        let n = nget as usize;
        // SAFETY: `port_getn(3C)` initialised the first `n` entries.
        unsafe { self.events.set_len(n) };

        for ev in &self.events {
            if ev.portev_source as i32 != libc::PORT_SOURCE_FD as i32 {
                continue;
            }
            let fd = ev.portev_object as RawFd;
            let bits = ev.portev_events as libc::c_short;
            let mut revents = EventSet::NONE;
            if bits & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                revents |= EventSet::READ;
            }
            if bits & (libc::POLLOUT | libc::POLLERR | libc::POLLHUP) != 0 {
                revents |= EventSet::WRITE;
            }
            events.push(SysEvent::Ready { fd, revents });
        }

        if n == self.events.capacity() {
            self.events.reserve(n);
        }
        Ok(())
    }

    fn fork(&mut self) -> io::Result<()> {
        let port = syscall!(port_create())?;
        // SAFETY: see `create`.
        self.port = unsafe { OwnedFd::from_raw_fd(port) };
        syscall!(fcntl(self.port.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;
        Ok(())
    }

    fn oneshot_delivery(&self) -> bool {
        true
    }
}
