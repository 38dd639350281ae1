use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use crate::event::EventSet;
use crate::time::Timestamp;

use super::{Backend, BackendKind, SysEvent};

/// `select(2)` backend. Kept for platforms and masks where nothing better
/// is available; fds at or above FD_SETSIZE are rejected at modify time so
/// the loop kills them instead of corrupting the sets.
pub(crate) struct Select {
    interests: BTreeMap<RawFd, EventSet>,
}

pub(crate) fn create() -> io::Result<Box<dyn Backend>> {
    Ok(Box::new(Select {
        interests: BTreeMap::new(),
    }))
}

impl Backend for Select {
    fn kind(&self) -> BackendKind {
        BackendKind::Select
    }

    fn fudge(&self) -> Timestamp {
        // select rounds its timeout much more coarsely than the others.
        1e-2
    }

    fn modify(&mut self, fd: RawFd, _old: EventSet, new: EventSet) -> io::Result<()> {
        if new.is_empty() {
            self.interests.remove(&fd);
            return Ok(());
        }
        if fd as usize >= libc::FD_SETSIZE {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.interests.insert(fd, new);
        Ok(())
    }

    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()> {
        // SAFETY: an all-zero fd_set is a valid empty set.
        let mut read_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { mem::zeroed() };
        let mut max_fd: RawFd = -1;

        for (&fd, &interest) in &self.interests {
            unsafe {
                if interest.is_readable() {
                    libc::FD_SET(fd, &mut read_set);
                }
                if interest.is_writable() {
                    libc::FD_SET(fd, &mut write_set);
                }
            }
            max_fd = max_fd.max(fd);
        }

        let secs = timeout as libc::time_t;
        let mut tv = libc::timeval {
            tv_sec: secs,
            tv_usec: ((timeout - secs as Timestamp) * 1e6) as libc::suseconds_t,
        };

        let res = syscall!(select(
            max_fd + 1,
            &mut read_set,
            &mut write_set,
            std::ptr::null_mut(),
            &mut tv,
        ));

        match res {
            Ok(0) => Ok(()),
            Ok(_) => {
                for (&fd, _) in &self.interests {
                    let mut revents = EventSet::NONE;
                    unsafe {
                        if libc::FD_ISSET(fd, &read_set) {
                            revents |= EventSet::READ;
                        }
                        if libc::FD_ISSET(fd, &write_set) {
                            revents |= EventSet::WRITE;
                        }
                    }
                    if !revents.is_empty() {
                        events.push(SysEvent::Ready { fd, revents });
                    }
                }
                Ok(())
            }
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn fork(&mut self) -> io::Result<()> {
        Ok(())
    }
}
