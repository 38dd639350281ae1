use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::sys::pipe;
use crate::watcher::{chain_collect, chain_push, chain_remove, Kind, Watcher, MAX_PRIORITY};

/// Highest supported signal number. Fixed because the handler can only
/// touch statically sized state.
pub(crate) const MAX_SIGNUM: usize = 64;

/// Per-signum watcher chain on the default loop.
pub(crate) struct SignalSlot {
    pub head: Option<u32>,
}

// State shared with the signal handler. The handler may run on any thread
// at any instant, so everything here is atomic and the handler restricts
// itself to stores, one swap and one write(2).
#[allow(clippy::declare_interior_mutable_const)]
const PENDING_INIT: AtomicBool = AtomicBool::new(false);
static PENDING: [AtomicBool; MAX_SIGNUM] = [PENDING_INIT; MAX_SIGNUM];
static GOT_SIGNAL: AtomicBool = AtomicBool::new(false);
static PIPE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

// Whether a default loop currently exists; it alone owns the pipe and the
// signal/child machinery.
static DEFAULT_CLAIMED: AtomicBool = AtomicBool::new(false);

pub(crate) fn claim_default() -> bool {
    !DEFAULT_CLAIMED.swap(true, Ordering::AcqRel)
}

pub(crate) fn release_default() {
    DEFAULT_CLAIMED.store(false, Ordering::Release)
}

pub(crate) fn set_pipe_write_fd(fd: libc::c_int) {
    PIPE_WRITE_FD.store(fd, Ordering::Release);
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "emscripten"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos"
))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno()
}

#[cfg(any(target_os = "illumos", target_os = "solaris"))]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::___errno()
}

// Async-signal-safe: two atomic accesses and at most one write(2), with
// errno saved around it. Coalescing: however many signals arrive before the
// loop drains the pipe, only one wakeup byte is ever in flight.
extern "C" fn handler(signum: libc::c_int) {
    if signum < 1 || signum as usize > MAX_SIGNUM {
        return;
    }
    PENDING[signum as usize - 1].store(true, Ordering::Release);

    if !GOT_SIGNAL.swap(true, Ordering::AcqRel) {
        let fd = PIPE_WRITE_FD.load(Ordering::Acquire);
        if fd >= 0 {
            unsafe {
                let saved_errno = *errno_location();
                let byte = 1u8;
                libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
                *errno_location() = saved_errno;
            }
        }
    }
}

fn install_handler(signum: libc::c_int) {
    // SAFETY: the handler is async-signal-safe, see above.
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        let f: extern "C" fn(libc::c_int) = handler;
        sa.sa_sigaction = f as usize;
        libc::sigfillset(&mut sa.sa_mask);
        // If restarting works we save one loop iteration.
        sa.sa_flags = libc::SA_RESTART;
        libc::sigaction(signum, &sa, std::ptr::null_mut());
    }
}

pub(crate) fn restore_default_handler(signum: libc::c_int) {
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
    }
}

/// Callback of the internal io watcher on the pipe's read end: drain the
/// wakeup byte, then deliver every flagged signal, highest signum first.
pub(crate) fn pipe_cb(el: &mut EventLoop, _w: Watcher, _revents: EventSet) {
    if let Some((read_end, _)) = &el.sigpipe {
        let mut byte = 0u8;
        unsafe {
            libc::read(
                read_end.as_raw_fd(),
                &mut byte as *mut u8 as *mut libc::c_void,
                1,
            );
        }
    }
    GOT_SIGNAL.store(false, Ordering::Release);

    for signum in (1..=MAX_SIGNUM).rev() {
        if PENDING[signum - 1].swap(false, Ordering::AcqRel) {
            el.feed_signal_event(signum as libc::c_int);
        }
    }
}

impl EventLoop {
    /// Feed `SIGNAL` to every watcher registered for `signum`, as if the
    /// signal had been received. Only meaningful on the default loop.
    pub fn feed_signal_event(&mut self, signum: libc::c_int) {
        if !self.is_default || signum < 1 {
            return;
        }
        let slot = match self.signals.get(signum as usize - 1) {
            Some(slot) => slot,
            None => return,
        };
        for w in chain_collect(&self.watchers, slot.head) {
            self.feed_event(w, EventSet::SIGNAL);
        }
    }

    pub(crate) fn start_signal(&mut self, w: Watcher) {
        assert!(
            self.is_default,
            "signal watchers are only supported on the default loop"
        );
        let signum = match self.watchers.get(w).unwrap().kind {
            Kind::Signal { signum, .. } => signum,
            _ => unreachable!(),
        };
        assert!(
            signum >= 1 && signum as usize <= MAX_SIGNUM,
            "signal watcher started with an unsupported signal number"
        );

        self.activate(w, 1);
        if self.signals.len() < signum as usize {
            self.signals
                .resize_with(signum as usize, || SignalSlot { head: None });
        }
        let slot = &mut self.signals[signum as usize - 1];
        let first = slot.head.is_none();
        chain_push(&mut self.watchers, &mut slot.head, w.index);

        if first {
            install_handler(signum);
        }
    }

    pub(crate) fn stop_signal(&mut self, w: Watcher) {
        let signum = match self.watchers.get(w).unwrap().kind {
            Kind::Signal { signum, .. } => signum,
            _ => unreachable!(),
        };
        let slot = &mut self.signals[signum as usize - 1];
        chain_remove(&mut self.watchers, &mut slot.head, w.index);
        self.deactivate(w);

        if self.signals[signum as usize - 1].head.is_none() {
            restore_default_handler(signum);
        }
    }

    /// Wire up the self-pipe and its ref-neutral internal io watcher.
    /// Default-loop construction and the fork handoff both end up here.
    pub(crate) fn init_signal_pipe(&mut self) -> io::Result<()> {
        let (read_end, write_end) = pipe::new()?;
        set_pipe_write_fd(write_end.as_raw_fd());
        let read_fd = read_end.as_raw_fd();
        self.sigpipe = Some((read_end, write_end));

        let w = self.io(read_fd, EventSet::READ, pipe_cb);
        self.set_priority(w, MAX_PRIORITY);
        self.start(w);
        // A lone signal registration must not keep the loop alive.
        self.unref();
        self.sigev = Some(w);
        Ok(())
    }

    /// Post-fork: the pipe is shared with the parent, so replace it and
    /// move the internal watcher over to the new read end.
    pub(crate) fn fork_signal_pipe(&mut self) -> io::Result<()> {
        let w = self.sigev.expect("default loop without a pipe watcher");

        // Balance the unref from init before stopping the watcher.
        self.add_ref();
        self.stop(w);
        set_pipe_write_fd(-1);
        self.sigpipe = None;

        let (read_end, write_end) = pipe::new()?;
        set_pipe_write_fd(write_end.as_raw_fd());
        let read_fd = read_end.as_raw_fd();
        self.sigpipe = Some((read_end, write_end));

        self.set_io(w, read_fd, EventSet::READ);
        self.start(w);
        self.unref();
        Ok(())
    }
}
