use std::io;
use std::os::unix::io::RawFd;

use crate::event::EventSet;
use crate::flags::Flags;
use crate::time::Timestamp;

macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) use syscall;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;
mod poll;
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
mod port;
mod select;

pub(crate) mod pipe;

/// The kernel multiplexer an [`EventLoop`](crate::EventLoop) ended up with.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BackendKind {
    /// `select(2)`.
    Select,
    /// `poll(2)`.
    Poll,
    /// `epoll(7)`.
    Epoll,
    /// `kqueue(2)`.
    Kqueue,
    /// Solaris event ports.
    Port,
}

impl BackendKind {
    pub(crate) const fn bit(self) -> u32 {
        match self {
            BackendKind::Select => 0x0000_0001,
            BackendKind::Poll => 0x0000_0002,
            BackendKind::Epoll => 0x0000_0004,
            BackendKind::Kqueue => 0x0000_0008,
            BackendKind::Port => 0x0000_0020,
        }
    }
}

/// What a backend observed about one file descriptor.
pub(crate) enum SysEvent {
    /// The fd is ready; `revents` is a subset of READ|WRITE.
    Ready { fd: RawFd, revents: EventSet },
    /// The kernel reports the fd as invalid; its watchers must be killed.
    Stale { fd: RawFd },
    /// The kernel lost our interest registration (e.g. close/reopen races);
    /// the current interest must be re-submitted.
    Rearm { fd: RawFd },
}

/// Kernel multiplexer adapter.
///
/// Implementations own the kernel object and per-backend buffers. `poll`
/// reports readiness through the `events` sink and never touches watcher
/// state; interpreting the verdicts is the loop's business.
pub(crate) trait Backend {
    fn kind(&self) -> BackendKind;

    /// Compensation added to computed sleep times for kernels that wake a
    /// little early.
    fn fudge(&self) -> Timestamp;

    /// Communicate a changed interest set for `fd`. `old` is what was last
    /// communicated. An error verdict means the loop should treat the fd as
    /// dead (or, for unexpected errors, abort the run).
    fn modify(&mut self, fd: RawFd, old: EventSet, new: EventSet) -> io::Result<()>;

    /// Block for up to `timeout` seconds (always finite) and push one
    /// `SysEvent` per observation. EINTR-class wakeups return success with
    /// no events.
    fn poll(&mut self, timeout: Timestamp, events: &mut Vec<SysEvent>) -> io::Result<()>;

    /// Re-create kernel state after `fork(2)`; the loop re-arms every fd
    /// afterwards.
    fn fork(&mut self) -> io::Result<()>;

    /// True if the kernel drops interest upon delivering an event, so every
    /// delivered fd needs re-arming (event ports).
    fn oneshot_delivery(&self) -> bool {
        false
    }
}

type Constructor = fn() -> io::Result<Box<dyn Backend>>;

/// Instantiate the first usable backend allowed by `mask`, trying the most
/// capable multiplexers first.
pub(crate) fn create(mask: u32) -> io::Result<Box<dyn Backend>> {
    let mask = if mask == 0 { Flags::ANY.backend_mask() } else { mask };

    let mut candidates: Vec<(BackendKind, Constructor)> = Vec::new();
    #[cfg(any(
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "ios",
        target_os = "macos",
        target_os = "netbsd",
        target_os = "openbsd"
    ))]
    candidates.push((BackendKind::Kqueue, kqueue::create));
    #[cfg(any(target_os = "linux", target_os = "android"))]
    candidates.push((BackendKind::Epoll, epoll::create));
    #[cfg(any(target_os = "illumos", target_os = "solaris"))]
    candidates.push((BackendKind::Port, port::create));
    candidates.push((BackendKind::Poll, poll::create));
    candidates.push((BackendKind::Select, select::create));

    let mut last_err = None;
    for (kind, init) in candidates {
        if mask & kind.bit() == 0 {
            continue;
        }
        match init() {
            Ok(backend) => {
                log::trace!("selected {:?} backend", kind);
                return Ok(backend);
            }
            Err(err) => {
                log::trace!("{:?} backend unavailable: {}", kind, err);
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::Unsupported, "no usable event backend")
    }))
}

/// Milliseconds for epoll/poll style timeouts, rounded up so sub-millisecond
/// sleeps do not busy-loop.
#[allow(dead_code)] // Not every platform compiles a millisecond backend pair.
pub(crate) fn timeout_ms(timeout: Timestamp) -> libc::c_int {
    (timeout * 1e3).ceil() as libc::c_int
}

/// `timespec` for kevent/port style timeouts.
#[allow(dead_code)]
pub(crate) fn timeout_timespec(timeout: Timestamp) -> libc::timespec {
    let secs = timeout as libc::time_t;
    libc::timespec {
        tv_sec: secs,
        tv_nsec: ((timeout - secs as Timestamp) * 1e9) as libc::c_long,
    }
}
