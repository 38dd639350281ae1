use std::io;
use std::os::unix::io::RawFd;

use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::sys::syscall;
use crate::watcher::{chain_push, chain_remove, Kind, Watcher};

/// Per-fd bookkeeping: the chain of io watchers, the interest last
/// communicated to the backend, and whether the fd sits in the change
/// queue.
pub(crate) struct Anfd {
    pub head: Option<u32>,
    pub events: EventSet,
    pub reify: bool,
}

impl Anfd {
    fn new() -> Anfd {
        Anfd {
            head: None,
            events: EventSet::NONE,
            reify: false,
        }
    }
}

fn is_fd_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EBADF) | Some(libc::ENOENT) | Some(libc::EPERM) | Some(libc::EINVAL)
    )
}

impl EventLoop {
    pub(crate) fn start_io(&mut self, w: Watcher) {
        let rec = self.watchers.get_mut(w).unwrap();
        let fd = match rec.kind {
            Kind::Io { fd, .. } => fd,
            _ => unreachable!(),
        };
        assert!(fd >= 0, "io watcher started with a negative fd");

        self.activate(w, 1);
        if self.anfds.len() <= fd as usize {
            self.anfds.resize_with(fd as usize + 1, Anfd::new);
        }
        chain_push(&mut self.watchers, &mut self.anfds[fd as usize].head, w.index);
        self.fd_change(fd);
    }

    pub(crate) fn stop_io(&mut self, w: Watcher) {
        let fd = match self.watchers.get(w).unwrap().kind {
            Kind::Io { fd, .. } => fd,
            _ => unreachable!(),
        };
        chain_remove(&mut self.watchers, &mut self.anfds[fd as usize].head, w.index);
        self.deactivate(w);
        self.fd_change(fd);
    }

    /// Deliver kernel readiness for `fd`: every io watcher on the fd whose
    /// interest overlaps `revents` is fed the overlap.
    pub fn feed_fd_event(&mut self, fd: RawFd, revents: EventSet) {
        if fd < 0 || fd as usize >= self.anfds.len() {
            return;
        }

        // Snapshot first: callbacks queued here may rearrange the chain.
        let mut hits: Vec<(Watcher, EventSet)> = Vec::new();
        let mut cursor = self.anfds[fd as usize].head;
        while let Some(idx) = cursor {
            let rec = self.watchers.by_index(idx);
            match rec.kind {
                Kind::Io { events, next, .. } => {
                    let overlap = events & revents;
                    if !overlap.is_empty() {
                        hits.push((self.watchers.handle(idx), overlap));
                    }
                    cursor = next;
                }
                _ => unreachable!(),
            }
        }

        for (w, ev) in hits {
            self.feed_event(w, ev);
        }
    }

    /// Queue `fd` for the next reify pass.
    pub(crate) fn fd_change(&mut self, fd: RawFd) {
        let anfd = &mut self.anfds[fd as usize];
        if anfd.reify {
            return;
        }
        anfd.reify = true;
        self.fdchanges.push(fd);
    }

    /// Push queued interest changes to the backend.
    pub(crate) fn fd_reify(&mut self) -> io::Result<()> {
        // Indexed loop: killing an fd mid-pass appends to the queue and the
        // appended entries are handled in this same pass.
        let mut i = 0;
        while i < self.fdchanges.len() {
            let fd = self.fdchanges[i];
            i += 1;

            let mut events = EventSet::NONE;
            let mut cursor = self.anfds[fd as usize].head;
            while let Some(idx) = cursor {
                match self.watchers.by_index(idx).kind {
                    Kind::Io {
                        events: ev, next, ..
                    } => {
                        events |= ev;
                        cursor = next;
                    }
                    _ => unreachable!(),
                }
            }

            let old = self.anfds[fd as usize].events;
            self.anfds[fd as usize].reify = false;

            if old != events {
                match self.backend.modify(fd, old, events) {
                    Ok(()) => {}
                    Err(err) if is_fd_error(&err) => {
                        log::trace!("backend rejected fd {}: {}", fd, err);
                        self.fd_kill(fd);
                    }
                    Err(err) => return Err(err),
                }
                self.anfds[fd as usize].events = events;
            }
        }
        self.fdchanges.clear();
        Ok(())
    }

    /// The fd is gone as far as the kernel is concerned: stop every watcher
    /// on it and report `ERROR|READ|WRITE`. The fd itself is left alone; if
    /// the caller owns it, closing it is the caller's decision.
    pub(crate) fn fd_kill(&mut self, fd: RawFd) {
        if fd < 0 || fd as usize >= self.anfds.len() {
            return;
        }
        while let Some(idx) = self.anfds[fd as usize].head {
            let w = self.watchers.handle(idx);
            self.stop(w);
            self.feed_event(w, EventSet::ERROR | EventSet::READ | EventSet::WRITE);
        }
    }

    /// The backend reported EBADF without naming the culprit: probe every
    /// registered fd and kill the invalid ones.
    pub(crate) fn fd_ebadf(&mut self) {
        for fd in 0..self.anfds.len() as RawFd {
            if self.anfds[fd as usize].events.is_empty() {
                continue;
            }
            if let Err(err) = syscall!(fcntl(fd, libc::F_GETFD)) {
                if err.raw_os_error() == Some(libc::EBADF) {
                    self.fd_kill(fd);
                }
            }
        }
    }

    /// The backend ran out of kernel memory: shed the highest registered fd
    /// and let the next iteration retry with a smaller set.
    pub(crate) fn fd_enomem(&mut self) {
        for fd in (0..self.anfds.len() as RawFd).rev() {
            if !self.anfds[fd as usize].events.is_empty() {
                self.fd_kill(fd);
                return;
            }
        }
    }

    /// Forget what the backend knows and queue every registered fd for
    /// re-registration, e.g. after the backend rebuilt its kernel object.
    pub(crate) fn fd_rearm_all(&mut self) {
        for fd in 0..self.anfds.len() as RawFd {
            if !self.anfds[fd as usize].events.is_empty() {
                self.anfds[fd as usize].events = EventSet::NONE;
                self.fd_change(fd);
            }
        }
    }
}
