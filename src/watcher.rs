use std::os::unix::io::RawFd;

use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::slab::Slab;
use crate::time::Timestamp;

/// Lowest watcher priority.
pub const MIN_PRIORITY: i32 = -2;
/// Highest watcher priority.
pub const MAX_PRIORITY: i32 = 2;

pub(crate) const NUM_PRIORITIES: usize = (MAX_PRIORITY - MIN_PRIORITY + 1) as usize;

/// Handle to a watcher registered with an [`EventLoop`].
///
/// Handles are small `Copy` values. They stay valid until
/// [`EventLoop::destroy`]; using a destroyed handle in a lifecycle
/// operation panics, while internal dispatch simply skips it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Watcher {
    pub(crate) index: u32,
    pub(crate) gen: u32,
}

/// Watcher callback: invoked with the loop, the watcher's own handle and
/// the set of events that fired. Callbacks may start, stop, feed or destroy
/// any watcher, including the one currently executing.
pub type Callback = Box<dyn FnMut(&mut EventLoop, Watcher, EventSet)>;

/// Reschedule hook of a periodic watcher: given the watcher and the current
/// wall-clock time, return the next absolute deadline. It must return a
/// time strictly in the future and must not touch the loop.
pub type RescheduleFn = Box<dyn FnMut(Watcher, Timestamp) -> Timestamp>;

/// One watcher record inside the loop's arena.
pub(crate) struct Record {
    /// 0 while stopped; otherwise a 1-based position (heap slot for timed
    /// watchers, array slot for idle/prepare/check, 1 for list-linked
    /// watchers).
    pub active: usize,
    /// 0 or a 1-based index into the pending queue of `priority`.
    pub pending: usize,
    pub priority: i32,
    /// Taken out of the record for the duration of each invocation.
    pub cb: Option<Callback>,
    pub kind: Kind,
}

impl Record {
    pub fn new(kind: Kind, cb: Callback) -> Record {
        Record {
            active: 0,
            pending: 0,
            priority: 0,
            cb: Some(cb),
            kind,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    pub fn abspri(&self) -> usize {
        (self.priority - MIN_PRIORITY) as usize
    }
}

/// The watcher variants.
pub(crate) enum Kind {
    Io {
        fd: RawFd,
        events: EventSet,
        next: Option<u32>,
    },
    Timer {
        /// Absolute monotonic deadline while active, relative offset while
        /// stopped.
        at: Timestamp,
        repeat: Timestamp,
    },
    Periodic {
        /// Absolute wall-clock deadline.
        at: Timestamp,
        interval: Timestamp,
        reschedule: Option<RescheduleFn>,
    },
    Signal {
        signum: libc::c_int,
        next: Option<u32>,
    },
    Child {
        pid: libc::pid_t,
        rpid: libc::pid_t,
        rstatus: libc::c_int,
        next: Option<u32>,
    },
    Idle,
    Prepare,
    Check,
}

impl Kind {
    pub fn deadline(&self) -> Timestamp {
        match self {
            Kind::Timer { at, .. } | Kind::Periodic { at, .. } => *at,
            _ => panic!("deadline on a watcher without a time base"),
        }
    }

    pub fn set_deadline(&mut self, t: Timestamp) {
        match self {
            Kind::Timer { at, .. } | Kind::Periodic { at, .. } => *at = t,
            _ => panic!("deadline on a watcher without a time base"),
        }
    }

    pub fn shift_deadline(&mut self, by: Timestamp) {
        match self {
            Kind::Timer { at, .. } | Kind::Periodic { at, .. } => *at += by,
            _ => panic!("deadline on a watcher without a time base"),
        }
    }

    fn next(&self) -> Option<u32> {
        match self {
            Kind::Io { next, .. } | Kind::Signal { next, .. } | Kind::Child { next, .. } => *next,
            _ => panic!("chain link on an unchained watcher"),
        }
    }

    fn set_next(&mut self, link: Option<u32>) {
        match self {
            Kind::Io { next, .. } | Kind::Signal { next, .. } | Kind::Child { next, .. } => {
                *next = link
            }
            _ => panic!("chain link on an unchained watcher"),
        }
    }
}

// Chain helpers for the head-index + next-index lists (io watchers per fd,
// signal watchers per signum, child watchers per pid bucket).

pub(crate) fn chain_push(slab: &mut Slab, head: &mut Option<u32>, index: u32) {
    let next = head.replace(index);
    slab.by_index_mut(index).kind.set_next(next);
}

pub(crate) fn chain_remove(slab: &mut Slab, head: &mut Option<u32>, index: u32) {
    let mut cursor = *head;
    let mut prev: Option<u32> = None;

    while let Some(at) = cursor {
        let next = slab.by_index(at).kind.next();
        if at == index {
            match prev {
                Some(p) => slab.by_index_mut(p).kind.set_next(next),
                None => *head = next,
            }
            slab.by_index_mut(at).kind.set_next(None);
            return;
        }
        prev = Some(at);
        cursor = next;
    }
}

/// Snapshot a chain's handles so feeding can safely mutate the chain.
pub(crate) fn chain_collect(slab: &Slab, head: Option<u32>) -> Vec<Watcher> {
    let mut out = Vec::new();
    let mut cursor = head;
    while let Some(at) = cursor {
        out.push(slab.handle(at));
        cursor = slab.by_index(at).kind.next();
    }
    out
}
