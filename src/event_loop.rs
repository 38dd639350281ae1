use std::io;
use std::os::unix::io::{OwnedFd, RawFd};

use crate::child;
use crate::event::EventSet;
use crate::fd::Anfd;
use crate::flags::{Flags, RunFlags, Unloop};
use crate::heap::TimeHeap;
use crate::signal::{self, SignalSlot};
use crate::slab::Slab;
use crate::sys::{self, Backend, BackendKind, SysEvent};
use crate::time::{self, Timestamp, MAX_BLOCKTIME};
use crate::watcher::{
    Kind, Record, RescheduleFn, Watcher, MAX_PRIORITY, MIN_PRIORITY, NUM_PRIORITIES,
};

pub(crate) struct PendingSlot {
    /// `None` marks a tombstone: the watcher was stopped between enqueue
    /// and drain and must not be invoked.
    pub watcher: Option<Watcher>,
    pub revents: EventSet,
}

/// A single-threaded reactor multiplexing file-descriptor readiness,
/// timers, wall-clock periodics, POSIX signals, child-process state changes
/// and the idle/prepare/check hooks onto user callbacks.
///
/// Watchers are created with the constructor methods ([`io`], [`timer`],
/// [`periodic`], [`signal`], [`child`], [`idle`], [`prepare`], [`check`]),
/// armed with [`start`], disarmed with [`stop`] and given back with
/// [`destroy`]. [`run`] turns the crank.
///
/// Any number of independent loops may coexist (one per thread), but only
/// the loop created with [`new_default`] owns the process-wide signal and
/// child machinery, and only it accepts signal and child watchers.
///
/// All callbacks run on the thread inside [`run`]; there is no internal
/// locking and no hidden yield point. A callback may start, stop, feed or
/// destroy any watcher, including itself.
///
/// [`io`]: EventLoop::io
/// [`timer`]: EventLoop::timer
/// [`periodic`]: EventLoop::periodic
/// [`signal`]: EventLoop::signal
/// [`child`]: EventLoop::child
/// [`idle`]: EventLoop::idle
/// [`prepare`]: EventLoop::prepare
/// [`check`]: EventLoop::check
/// [`start`]: EventLoop::start
/// [`stop`]: EventLoop::stop
/// [`destroy`]: EventLoop::destroy
/// [`run`]: EventLoop::run
/// [`new_default`]: EventLoop::new_default
pub struct EventLoop {
    pub(crate) watchers: Slab,
    pub(crate) backend: Box<dyn Backend>,
    sys_events: Vec<SysEvent>,

    pub(crate) anfds: Vec<Anfd>,
    pub(crate) fdchanges: Vec<RawFd>,

    pub(crate) timers: TimeHeap,
    pub(crate) periodics: TimeHeap,

    pub(crate) signals: Vec<SignalSlot>,
    pub(crate) child_buckets: [Option<u32>; child::PID_HASHSIZE],

    idles: Vec<Watcher>,
    prepares: Vec<Watcher>,
    checks: Vec<Watcher>,

    pendings: [Vec<PendingSlot>; NUM_PRIORITIES],

    activecnt: isize,
    loop_done: Option<Unloop>,

    pub(crate) wall_now: Timestamp,
    pub(crate) mono_now: Timestamp,
    pub(crate) now_floor: Timestamp,
    pub(crate) wall_mono_diff: Timestamp,
    pub(crate) have_monotonic: bool,

    postfork: bool,
    forkcheck: bool,
    pid: libc::pid_t,

    pub(crate) is_default: bool,
    pub(crate) sigpipe: Option<(OwnedFd, OwnedFd)>,
    pub(crate) sigev: Option<Watcher>,
    childev: Option<Watcher>,
}

fn secure_execution() -> bool {
    unsafe { libc::getuid() != libc::geteuid() || libc::getgid() != libc::getegid() }
}

fn resolve_backend_mask(flags: Flags) -> u32 {
    let mut mask = flags.backend_mask();
    if mask == 0 && !flags.contains(Flags::NOENV) && !secure_execution() {
        if let Ok(value) = std::env::var("REVENT_FLAGS") {
            if let Ok(bits) = value.trim().parse::<u32>() {
                mask = Flags::from_bits(bits).backend_mask();
            }
        }
    }
    mask
}

/// Remove `w` from an unordered watcher array by swapping in the last
/// element and fixing up its stored position.
fn array_stop(slab: &mut Slab, array: &mut Vec<Watcher>, w: Watcher) {
    let pos = slab.get(w).unwrap().active;
    let last = array.pop().expect("stop on an empty watcher array");
    if pos <= array.len() {
        array[pos - 1] = last;
        slab.get_mut(last).unwrap().active = pos;
    }
}

impl EventLoop {
    /// Create an event loop without signal or child support.
    ///
    /// The backends permitted by `flags` are tried in order of preference
    /// (kqueue, epoll, port, poll, select); with [`Flags::AUTO`] the
    /// `REVENT_FLAGS` environment variable may narrow the choice unless
    /// [`Flags::NOENV`] is set or the process runs setuid/setgid.
    pub fn new(flags: Flags) -> io::Result<EventLoop> {
        EventLoop::build(flags, false)
    }

    /// Create the default event loop.
    ///
    /// The default loop additionally owns the process-wide signal handling
    /// (self-pipe plus internal watcher) and the SIGCHLD reaper. At most
    /// one default loop may exist at a time; dropping it releases the
    /// claim.
    pub fn new_default(flags: Flags) -> io::Result<EventLoop> {
        if !signal::claim_default() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a default event loop already exists",
            ));
        }
        let mut el = match EventLoop::build(flags, true) {
            Ok(el) => el,
            Err(err) => {
                signal::release_default();
                return Err(err);
            }
        };
        // On failure `el` is dropped, which releases the claim.
        el.init_default()?;
        Ok(el)
    }

    fn build(flags: Flags, is_default: bool) -> io::Result<EventLoop> {
        let backend = sys::create(resolve_backend_mask(flags))?;

        let have_monotonic = time::probe_monotonic();
        let wall_now = time::wall_time();
        let mono_now = if have_monotonic {
            time::monotonic_time()
        } else {
            wall_now
        };

        Ok(EventLoop {
            watchers: Slab::new(),
            backend,
            sys_events: Vec::new(),
            anfds: Vec::new(),
            fdchanges: Vec::new(),
            timers: TimeHeap::new(),
            periodics: TimeHeap::new(),
            signals: Vec::new(),
            child_buckets: [None; child::PID_HASHSIZE],
            idles: Vec::new(),
            prepares: Vec::new(),
            checks: Vec::new(),
            pendings: std::array::from_fn(|_| Vec::new()),
            activecnt: 0,
            loop_done: None,
            wall_now,
            mono_now,
            now_floor: mono_now,
            wall_mono_diff: wall_now - mono_now,
            have_monotonic,
            postfork: false,
            forkcheck: flags.contains(Flags::FORKCHECK),
            pid: unsafe { libc::getpid() },
            is_default,
            sigpipe: None,
            sigev: None,
            childev: None,
        })
    }

    fn init_default(&mut self) -> io::Result<()> {
        self.init_signal_pipe()?;

        let reaper = self.signal(libc::SIGCHLD, child::sigchld_cb);
        self.set_priority(reaper, MAX_PRIORITY);
        self.start(reaper);
        // The reaper alone must not keep the loop alive.
        self.unref();
        self.childev = Some(reaper);
        Ok(())
    }

    // ===== watcher construction =====

    /// Create an io watcher for `fd` with the given interest (a subset of
    /// `READ | WRITE`). The watcher is returned stopped.
    pub fn io<F>(&mut self, fd: RawFd, events: EventSet, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        assert!(
            (EventSet::READ | EventSet::WRITE).contains(events),
            "io interest may only contain READ and WRITE"
        );
        self.watchers.insert(Record::new(
            Kind::Io {
                fd,
                events,
                next: None,
            },
            Box::new(cb),
        ))
    }

    /// Create a relative timer: it fires `after` seconds after being
    /// started and, with `repeat > 0`, every `repeat` seconds from then on.
    pub fn timer<F>(&mut self, after: Timestamp, repeat: Timestamp, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(
            Kind::Timer { at: after, repeat },
            Box::new(cb),
        ))
    }

    /// Create a periodic watcher anchored at the absolute wall-clock time
    /// `at`, re-armed every `interval` seconds. Unlike a timer it follows
    /// the wall clock through jumps.
    pub fn periodic<F>(&mut self, at: Timestamp, interval: Timestamp, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(
            Kind::Periodic {
                at,
                interval,
                reschedule: None,
            },
            Box::new(cb),
        ))
    }

    /// Create a periodic watcher whose next deadline is computed by
    /// `reschedule` instead of a fixed interval. The hook receives the
    /// current wall-clock time, must return a strictly later time, and must
    /// not touch the loop.
    pub fn periodic_with<F, R>(&mut self, at: Timestamp, reschedule: R, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
        R: FnMut(Watcher, Timestamp) -> Timestamp + 'static,
    {
        let reschedule: RescheduleFn = Box::new(reschedule);
        self.watchers.insert(Record::new(
            Kind::Periodic {
                at,
                interval: 0.0,
                reschedule: Some(reschedule),
            },
            Box::new(cb),
        ))
    }

    /// Create a signal watcher for `signum`. Only the default loop accepts
    /// these.
    pub fn signal<F>(&mut self, signum: libc::c_int, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(
            Kind::Signal { signum, next: None },
            Box::new(cb),
        ))
    }

    /// Create a child watcher for `pid` (0 watches every child). Only the
    /// default loop accepts these; the priority field is ignored.
    pub fn child<F>(&mut self, pid: libc::pid_t, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(
            Kind::Child {
                pid,
                rpid: 0,
                rstatus: 0,
                next: None,
            },
            Box::new(cb),
        ))
    }

    /// Create an idle watcher: fed whenever an iteration produced nothing
    /// else. While one is active the loop never blocks.
    pub fn idle<F>(&mut self, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(Kind::Idle, Box::new(cb)))
    }

    /// Create a prepare watcher: fed right before the loop blocks.
    pub fn prepare<F>(&mut self, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers
            .insert(Record::new(Kind::Prepare, Box::new(cb)))
    }

    /// Create a check watcher: fed right after the loop polled.
    pub fn check<F>(&mut self, cb: F) -> Watcher
    where
        F: FnMut(&mut EventLoop, Watcher, EventSet) + 'static,
    {
        self.watchers.insert(Record::new(Kind::Check, Box::new(cb)))
    }

    // ===== record access =====

    pub(crate) fn record(&self, w: Watcher) -> &Record {
        self.watchers
            .get(w)
            .expect("watcher handle used after destroy")
    }

    pub(crate) fn record_mut(&mut self, w: Watcher) -> &mut Record {
        self.watchers
            .get_mut(w)
            .expect("watcher handle used after destroy")
    }

    // ===== lifecycle =====

    /// Arm a watcher. Starting an already-started watcher is a no-op.
    pub fn start(&mut self, w: Watcher) {
        if self.record(w).is_active() {
            return;
        }
        match self.record(w).kind {
            Kind::Io { .. } => self.start_io(w),
            Kind::Timer { .. } => self.start_timer(w),
            Kind::Periodic { .. } => self.start_periodic(w),
            Kind::Signal { .. } => self.start_signal(w),
            Kind::Child { .. } => self.start_child(w),
            Kind::Idle => {
                self.idles.push(w);
                let pos = self.idles.len();
                self.activate(w, pos);
            }
            Kind::Prepare => {
                self.prepares.push(w);
                let pos = self.prepares.len();
                self.activate(w, pos);
            }
            Kind::Check => {
                self.checks.push(w);
                let pos = self.checks.len();
                self.activate(w, pos);
            }
        }
    }

    /// Disarm a watcher and drop any event it has queued. Stopping a
    /// stopped watcher is a no-op (the queued-event suppression still
    /// applies).
    pub fn stop(&mut self, w: Watcher) {
        self.clear_pending(w);
        if !self.record(w).is_active() {
            return;
        }
        match self.record(w).kind {
            Kind::Io { .. } => self.stop_io(w),
            Kind::Timer { .. } => self.stop_timer(w),
            Kind::Periodic { .. } => self.stop_periodic(w),
            Kind::Signal { .. } => self.stop_signal(w),
            Kind::Child { .. } => self.stop_child(w),
            Kind::Idle => {
                array_stop(&mut self.watchers, &mut self.idles, w);
                self.deactivate(w);
            }
            Kind::Prepare => {
                array_stop(&mut self.watchers, &mut self.prepares, w);
                self.deactivate(w);
            }
            Kind::Check => {
                array_stop(&mut self.watchers, &mut self.checks, w);
                self.deactivate(w);
            }
        }
    }

    /// Stop a watcher and reclaim its record. The handle is dead
    /// afterwards; lifecycle calls on it panic.
    pub fn destroy(&mut self, w: Watcher) {
        self.stop(w);
        self.watchers.remove(w);
    }

    pub(crate) fn activate(&mut self, w: Watcher, active: usize) {
        let rec = self.watchers.get_mut(w).unwrap();
        rec.priority = rec.priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        rec.active = active;
        self.add_ref();
    }

    pub(crate) fn deactivate(&mut self, w: Watcher) {
        self.watchers.get_mut(w).unwrap().active = 0;
        self.unref();
    }

    // ===== watcher re-configuration (stopped watchers only) =====

    /// Point an io watcher at a different fd / interest set.
    pub fn set_io(&mut self, w: Watcher, fd: RawFd, events: EventSet) {
        assert!(
            (EventSet::READ | EventSet::WRITE).contains(events),
            "io interest may only contain READ and WRITE"
        );
        let rec = self.record_mut(w);
        assert!(!rec.is_active(), "reconfigured an active watcher");
        match &mut rec.kind {
            Kind::Io {
                fd: f, events: e, ..
            } => {
                *f = fd;
                *e = events;
            }
            _ => panic!("set_io on a non-io watcher"),
        }
    }

    /// Re-set a timer's offset and repeat.
    pub fn set_timer(&mut self, w: Watcher, after: Timestamp, repeat: Timestamp) {
        let rec = self.record_mut(w);
        assert!(!rec.is_active(), "reconfigured an active watcher");
        match &mut rec.kind {
            Kind::Timer { at, repeat: r } => {
                *at = after;
                *r = repeat;
            }
            _ => panic!("set_timer on a non-timer watcher"),
        }
    }

    /// Re-set a periodic's anchor and interval. An existing reschedule hook
    /// is kept.
    pub fn set_periodic(&mut self, w: Watcher, at: Timestamp, interval: Timestamp) {
        let rec = self.record_mut(w);
        assert!(!rec.is_active(), "reconfigured an active watcher");
        match &mut rec.kind {
            Kind::Periodic {
                at: a,
                interval: i,
                ..
            } => {
                *a = at;
                *i = interval;
            }
            _ => panic!("set_periodic on a non-periodic watcher"),
        }
    }

    /// Re-set a signal watcher's signal number.
    pub fn set_signal(&mut self, w: Watcher, signum: libc::c_int) {
        let rec = self.record_mut(w);
        assert!(!rec.is_active(), "reconfigured an active watcher");
        match &mut rec.kind {
            Kind::Signal { signum: s, .. } => *s = signum,
            _ => panic!("set_signal on a non-signal watcher"),
        }
    }

    /// Re-set a child watcher's pid filter.
    pub fn set_child(&mut self, w: Watcher, pid: libc::pid_t) {
        let rec = self.record_mut(w);
        assert!(!rec.is_active(), "reconfigured an active watcher");
        match &mut rec.kind {
            Kind::Child { pid: p, .. } => *p = pid,
            _ => panic!("set_child on a non-child watcher"),
        }
    }

    /// Set a watcher's priority, clamped to
    /// [[`MIN_PRIORITY`], [`MAX_PRIORITY`]]. Only legal while the watcher
    /// is stopped and has no queued event.
    pub fn set_priority(&mut self, w: Watcher, priority: i32) {
        let rec = self.record_mut(w);
        assert!(
            !rec.is_active() && rec.pending == 0,
            "changed the priority of an active or queued watcher"
        );
        rec.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
    }

    // ===== introspection =====

    /// True while the watcher is started.
    pub fn is_active(&self, w: Watcher) -> bool {
        self.record(w).is_active()
    }

    /// True while the watcher has an event queued but not yet delivered.
    pub fn is_pending(&self, w: Watcher) -> bool {
        self.record(w).pending != 0
    }

    /// The watcher's priority.
    pub fn priority(&self, w: Watcher) -> i32 {
        self.record(w).priority
    }

    /// The wall-clock time of the current loop iteration. Cheaper than
    /// [`wall_time`](crate::wall_time) and constant within a callback,
    /// which is usually also what deadline arithmetic wants.
    pub fn now(&self) -> Timestamp {
        self.wall_now
    }

    /// The kernel multiplexer backing this loop.
    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// True for the loop created with
    /// [`new_default`](EventLoop::new_default).
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    // ===== reference accounting =====

    /// Take an extra reference on the loop: `run` keeps going while any
    /// references remain. Pairs with [`unref`](EventLoop::unref).
    pub fn add_ref(&mut self) {
        self.activecnt += 1;
    }

    /// Drop a loop reference. Used after starting a watcher that should
    /// not, by itself, keep [`run`](EventLoop::run) from returning.
    pub fn unref(&mut self) {
        self.activecnt -= 1;
    }

    pub(crate) fn active_count(&self) -> isize {
        self.activecnt
    }

    // ===== event feeding and dispatch =====

    /// Queue `revents` for a watcher as if the event had happened. If the
    /// watcher already has an event queued the sets are merged, so a
    /// watcher occupies at most one queue slot at any time.
    pub fn feed_event(&mut self, w: Watcher, revents: EventSet) {
        let rec = match self.watchers.get_mut(w) {
            Some(rec) => rec,
            None => return,
        };
        let pri = rec.abspri();
        if rec.pending != 0 {
            self.pendings[pri][rec.pending - 1].revents |= revents;
        } else {
            self.pendings[pri].push(PendingSlot {
                watcher: Some(w),
                revents,
            });
            rec.pending = self.pendings[pri].len();
        }
    }

    /// Drop a watcher's queued event, if any, returning the revents that
    /// will now never be delivered.
    pub fn clear_pending(&mut self, w: Watcher) -> EventSet {
        let rec = self.record_mut(w);
        if rec.pending == 0 {
            return EventSet::NONE;
        }
        let pri = rec.abspri();
        let index = rec.pending - 1;
        rec.pending = 0;
        let slot = &mut self.pendings[pri][index];
        slot.watcher = None;
        slot.revents
    }

    fn queue_events(&mut self, watchers: &[Watcher], bit: EventSet) {
        for &w in watchers {
            self.feed_event(w, bit);
        }
    }

    /// Drain the pending queues: highest priority first, newest first
    /// within a priority. A priority once left is not revisited until the
    /// next drain, even if callbacks queue more work into it.
    pub(crate) fn call_pending(&mut self) {
        for pri in (0..NUM_PRIORITIES).rev() {
            while let Some(slot) = self.pendings[pri].pop() {
                let w = match slot.watcher {
                    Some(w) => w,
                    None => continue,
                };
                if let Some(rec) = self.watchers.get_mut(w) {
                    rec.pending = 0;
                    self.invoke(w, slot.revents);
                }
            }
        }
    }

    /// Call a watcher's callback. The closure is moved out of the record
    /// for the call and restored afterwards unless the callback destroyed
    /// its own watcher.
    fn invoke(&mut self, w: Watcher, revents: EventSet) {
        let mut cb = match self.watchers.get_mut(w).and_then(|rec| rec.cb.take()) {
            Some(cb) => cb,
            None => return,
        };
        cb(self, w, revents);
        if let Some(rec) = self.watchers.get_mut(w) {
            if rec.cb.is_none() {
                rec.cb = Some(cb);
            }
        }
    }

    // ===== the loop =====

    /// Run the reactor.
    ///
    /// Returns when no watcher holds a loop reference, when
    /// [`unloop`](EventLoop::unloop) was called, or — with
    /// [`RunFlags::ONESHOT`] / [`RunFlags::NONBLOCK`] — after a single
    /// iteration. Errors out of the backend abort the call; the loop state
    /// stays consistent and `run` may be called again.
    pub fn run(&mut self, flags: RunFlags) -> io::Result<()> {
        self.loop_done = if flags.intersects(RunFlags::NONBLOCK | RunFlags::ONESHOT) {
            Some(Unloop::Once)
        } else {
            None
        };

        loop {
            if !self.prepares.is_empty() {
                let snapshot = self.prepares.clone();
                self.queue_events(&snapshot, EventSet::PREPARE);
                // Deliver right away: prepare hooks get to adjust interest
                // before the fds are reified and the loop blocks.
                self.call_pending();
            }

            if self.forkcheck && unsafe { libc::getpid() } != self.pid {
                self.postfork = true;
            }
            if self.postfork {
                self.fork_handoff()?;
            }

            self.fd_reify()?;

            // Refresh the cached clocks before computing the sleep.
            if self.have_monotonic {
                self.update_time_monotonic();
            } else {
                self.wall_now = time::wall_time();
                self.mono_now = self.wall_now;
            }

            let block = if flags.contains(RunFlags::NONBLOCK)
                || !self.idles.is_empty()
                || self.activecnt <= 0
            {
                0.0
            } else {
                let mut block = MAX_BLOCKTIME;
                let fudge = self.backend.fudge();
                if let Some(at) = self.timers.root_deadline(&self.watchers) {
                    block = block.min(at - self.mono_now + fudge);
                }
                if let Some(at) = self.periodics.root_deadline(&self.watchers) {
                    block = block.min(at - self.wall_now + fudge);
                }
                block.max(0.0)
            };

            self.backend_poll(block)?;

            self.update_time();

            self.timers_reify();
            self.periodics_reify();

            // Idle watchers only see iterations that produced nothing else.
            if !self.idles.is_empty() && self.pendings.iter().all(Vec::is_empty) {
                let snapshot = self.idles.clone();
                self.queue_events(&snapshot, EventSet::IDLE);
            }

            if !self.checks.is_empty() {
                let snapshot = self.checks.clone();
                self.queue_events(&snapshot, EventSet::CHECK);
            }

            self.call_pending();

            if self.activecnt <= 0 || self.loop_done.is_some() {
                break;
            }
        }

        // An `Unloop::All` request survives into enclosing `run` calls.
        if self.loop_done != Some(Unloop::All) {
            self.loop_done = None;
        }
        Ok(())
    }

    /// Ask [`run`](EventLoop::run) to return after the current iteration.
    pub fn unloop(&mut self, how: Unloop) {
        self.loop_done = Some(how);
    }

    /// Note that the process forked. The next `run` iteration rebuilds the
    /// backend's kernel state (and, on the default loop, the signal pipe)
    /// before polling. Safe to call from either side of the fork.
    pub fn post_fork(&mut self) {
        self.postfork = true;
    }

    fn fork_handoff(&mut self) -> io::Result<()> {
        log::trace!("rebuilding kernel state after fork");
        self.postfork = false;
        self.pid = unsafe { libc::getpid() };

        self.backend.fork()?;
        if self.is_default {
            self.fork_signal_pipe()?;
        }
        self.fd_rearm_all();
        Ok(())
    }

    fn backend_poll(&mut self, timeout: Timestamp) -> io::Result<()> {
        let mut events = std::mem::take(&mut self.sys_events);
        events.clear();

        match self.backend.poll(timeout, &mut events) {
            Ok(()) => {}
            Err(err) => match err.raw_os_error() {
                // The kernel saw a dead fd but could not tell us which.
                Some(libc::EBADF) => self.fd_ebadf(),
                // Shed the highest fd and limp on with a smaller set.
                Some(libc::ENOMEM) => self.fd_enomem(),
                _ => {
                    self.sys_events = events;
                    return Err(err);
                }
            },
        }

        let oneshot = self.backend.oneshot_delivery();
        for ev in events.drain(..) {
            match ev {
                SysEvent::Ready { fd, revents } => {
                    if oneshot && (fd as usize) < self.anfds.len() {
                        // Delivery dissolved the kernel association; queue a
                        // re-arm before handing the event out.
                        self.anfds[fd as usize].events = EventSet::NONE;
                        self.fd_change(fd);
                    }
                    self.feed_fd_event(fd, revents);
                }
                SysEvent::Stale { fd } => self.fd_kill(fd),
                SysEvent::Rearm { fd } => {
                    if (fd as usize) < self.anfds.len() {
                        self.anfds[fd as usize].events = EventSet::NONE;
                        self.fd_change(fd);
                    }
                }
            }
        }

        self.sys_events = events;
        Ok(())
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("backend", &self.backend.kind())
            .field("watchers", &self.watchers.len())
            .field("active", &self.activecnt)
            .field("is_default", &self.is_default)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::sys::syscall;

    fn el() -> EventLoop {
        EventLoop::new(Flags::AUTO).expect("unable to create an event loop")
    }

    #[test]
    fn pending_events_merge_into_one_slot() {
        let mut el = el();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        let w = el.idle(move |_el, _w, revents| log.borrow_mut().push(revents));
        el.feed_event(w, EventSet::READ);
        el.feed_event(w, EventSet::WRITE);
        el.feed_event(w, EventSet::READ);
        el.call_pending();

        assert_eq!(*seen.borrow(), vec![EventSet::READ | EventSet::WRITE]);
        assert!(!el.is_pending(w));
    }

    #[test]
    fn stop_suppresses_queued_event() {
        let mut el = el();
        let fired = Rc::new(RefCell::new(0));

        let count = Rc::clone(&fired);
        let w = el.idle(move |_el, _w, _revents| *count.borrow_mut() += 1);
        el.feed_event(w, EventSet::IDLE);
        assert!(el.is_pending(w));

        let dropped = el.clear_pending(w);
        assert_eq!(dropped, EventSet::IDLE);
        el.call_pending();
        assert_eq!(*fired.borrow(), 0);
    }

    #[test]
    fn drain_order_is_priority_then_newest_first() {
        let mut el = el();
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut make = |el: &mut EventLoop, tag: &'static str, pri: i32| {
            let order = Rc::clone(&order);
            let w = el.idle(move |_el, _w, _revents| order.borrow_mut().push(tag));
            el.set_priority(w, pri);
            w
        };

        let low = make(&mut el, "low", MIN_PRIORITY);
        let older = make(&mut el, "older", MAX_PRIORITY);
        let newer = make(&mut el, "newer", MAX_PRIORITY);

        el.feed_event(low, EventSet::IDLE);
        el.feed_event(older, EventSet::IDLE);
        el.feed_event(newer, EventSet::IDLE);
        el.call_pending();

        assert_eq!(*order.borrow(), vec!["newer", "older", "low"]);
    }

    #[test]
    fn ref_accounting_returns_to_baseline() {
        let mut el = el();
        let baseline = el.active_count();

        let mut watchers = Vec::new();
        for _ in 0..8 {
            let w = el.timer(10.0, 0.0, |_el, _w, _revents| {});
            el.start(w);
            watchers.push(w);
        }
        assert_eq!(el.active_count(), baseline + 8);

        for w in watchers {
            el.stop(w);
            // Stopping twice must not double-count.
            el.stop(w);
        }
        assert_eq!(el.active_count(), baseline);
    }

    #[test]
    fn destroyed_handle_is_skipped_by_feed() {
        let mut el = el();
        let w = el.idle(|_el, _w, _revents| {});
        el.destroy(w);
        // Feeding a dead handle is a no-op, not a panic.
        el.feed_event(w, EventSet::IDLE);
        el.call_pending();
    }

    #[test]
    #[should_panic(expected = "watcher handle used after destroy")]
    fn destroyed_handle_panics_on_lifecycle() {
        let mut el = el();
        let w = el.idle(|_el, _w, _revents| {});
        el.destroy(w);
        el.start(w);
    }

    #[test]
    fn callback_may_restart_itself() {
        let mut el = el();
        let fired = Rc::new(RefCell::new(0));

        let count = Rc::clone(&fired);
        let w = el.timer(0.001, 0.0, move |el, w, _revents| {
            let mut count = count.borrow_mut();
            *count += 1;
            if *count < 3 {
                el.set_timer(w, 0.001, 0.0);
                el.start(w);
            }
        });
        el.start(w);
        el.run(RunFlags::WAIT).unwrap();

        assert_eq!(*fired.borrow(), 3);
    }

    #[test]
    fn io_interest_union_reaches_backend_after_reify() {
        let mut el = el();
        let mut fds = [0 as RawFd; 2];
        syscall!(pipe(fds.as_mut_ptr())).unwrap();

        let r = el.io(fds[0], EventSet::READ, |_el, _w, _revents| {});
        let rw = el.io(fds[0], EventSet::READ | EventSet::WRITE, |_el, _w, _revents| {});
        el.start(r);
        el.start(rw);
        el.fd_reify().unwrap();
        assert_eq!(
            el.anfds[fds[0] as usize].events,
            EventSet::READ | EventSet::WRITE
        );

        el.stop(rw);
        el.fd_reify().unwrap();
        assert_eq!(el.anfds[fds[0] as usize].events, EventSet::READ);

        el.stop(r);
        el.fd_reify().unwrap();
        assert_eq!(el.anfds[fds[0] as usize].events, EventSet::NONE);

        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if !self.is_default {
            return;
        }

        if let Some(w) = self.childev.take() {
            self.add_ref();
            self.stop(w);
        }
        if let Some(w) = self.sigev.take() {
            self.add_ref();
            self.stop(w);
        }

        // Watchers the user never stopped still have handlers installed;
        // put the default dispositions back before the registry goes away.
        for signum in 1..=self.signals.len() {
            if self.signals[signum - 1].head.is_some() {
                signal::restore_default_handler(signum as libc::c_int);
            }
        }

        signal::set_pipe_write_fd(-1);
        self.sigpipe = None;
        signal::release_default();
    }
}
