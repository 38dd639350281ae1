use std::ops;

/// Configuration passed to [`EventLoop`] construction.
///
/// The low 16 bits select which backends may be tried; the high bits tweak
/// loop behavior. [`Flags::AUTO`] (no backend bit set) lets the environment
/// and the built-in preference order decide.
///
/// [`EventLoop`]: crate::EventLoop
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Flags(u32);

impl Flags {
    /// Pick the backend automatically.
    pub const AUTO: Flags = Flags(0x0000_0000);
    /// Allow the `select(2)` backend.
    pub const SELECT: Flags = Flags(0x0000_0001);
    /// Allow the `poll(2)` backend.
    pub const POLL: Flags = Flags(0x0000_0002);
    /// Allow the `epoll(7)` backend.
    pub const EPOLL: Flags = Flags(0x0000_0004);
    /// Allow the `kqueue(2)` backend.
    pub const KQUEUE: Flags = Flags(0x0000_0008);
    /// Allow the Solaris event port backend.
    pub const PORT: Flags = Flags(0x0000_0020);
    /// Allow every backend.
    pub const ANY: Flags = Flags(0x0000_ffff);

    /// Never consult the `REVENT_FLAGS` environment variable.
    pub const NOENV: Flags = Flags(0x0100_0000);
    /// Compare `getpid()` against the creating process on every iteration
    /// and run the fork handoff when it changed.
    pub const FORKCHECK: Flags = Flags(0x0200_0000);

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) const fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }

    pub(crate) const fn backend_mask(self) -> u32 {
        self.0 & Flags::ANY.0
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, other: Flags) {
        self.0 |= other.0;
    }
}

/// How [`EventLoop::run`] should behave.
///
/// [`EventLoop::run`]: crate::EventLoop::run
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct RunFlags(u32);

impl RunFlags {
    /// Keep iterating until no watcher holds a reference or the loop is
    /// broken out of.
    pub const WAIT: RunFlags = RunFlags(0x0);
    /// Do not block in the backend: poll once with a zero timeout.
    pub const NONBLOCK: RunFlags = RunFlags(0x1);
    /// Run exactly one iteration, blocking normally.
    pub const ONESHOT: RunFlags = RunFlags(0x2);

    /// Returns true if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: RunFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: RunFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for RunFlags {
    type Output = RunFlags;

    fn bitor(self, other: RunFlags) -> RunFlags {
        RunFlags(self.0 | other.0)
    }
}

/// Argument to [`EventLoop::unloop`]: how far out to break.
///
/// [`EventLoop::unloop`]: crate::EventLoop::unloop
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Unloop {
    /// Leave the innermost [`run`](crate::EventLoop::run) call.
    Once,
    /// Leave every nested `run` call; the request stays latched until the
    /// outermost call has returned.
    All,
}
