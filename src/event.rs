use std::{fmt, ops};

/// A set of event bits.
///
/// `EventSet` serves double duty: it expresses the *interest* of an io
/// watcher (a subset of [`READ`] and [`WRITE`]) and the *revents* a callback
/// receives, which may additionally carry the variant bit of the watcher
/// ([`TIMEOUT`], [`SIGNAL`], …) and [`ERROR`].
///
/// Sets are combined with `|` and inspected with [`contains`] /
/// [`intersects`].
///
/// [`READ`]: EventSet::READ
/// [`WRITE`]: EventSet::WRITE
/// [`TIMEOUT`]: EventSet::TIMEOUT
/// [`SIGNAL`]: EventSet::SIGNAL
/// [`ERROR`]: EventSet::ERROR
/// [`contains`]: EventSet::contains
/// [`intersects`]: EventSet::intersects
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EventSet(u32);

impl EventSet {
    /// The empty set.
    pub const NONE: EventSet = EventSet(0x0000_0000);
    /// The file descriptor is readable.
    pub const READ: EventSet = EventSet(0x0000_0001);
    /// The file descriptor is writable.
    pub const WRITE: EventSet = EventSet(0x0000_0002);
    /// A relative (monotonic) timer expired.
    pub const TIMEOUT: EventSet = EventSet(0x0000_0100);
    /// A wall-clock periodic timer expired.
    pub const PERIODIC: EventSet = EventSet(0x0000_0200);
    /// A watched POSIX signal was received.
    pub const SIGNAL: EventSet = EventSet(0x0000_0400);
    /// The loop has nothing better to do.
    pub const IDLE: EventSet = EventSet(0x0000_0800);
    /// The loop has just finished a poll.
    pub const CHECK: EventSet = EventSet(0x0000_1000);
    /// The loop is about to block.
    pub const PREPARE: EventSet = EventSet(0x0000_2000);
    /// A watched child process changed state.
    pub const CHILD: EventSet = EventSet(0x0000_4000);
    /// An unrecoverable error was detected on the event source.
    pub const ERROR: EventSet = EventSet(0x0080_0000);

    /// Combine two sets. Same as `|`, but usable in `const` context.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: EventSet) -> EventSet {
        EventSet(self.0 | other.0)
    }

    /// Returns true if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    pub const fn contains(self, other: EventSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: EventSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if the set includes readable readiness.
    pub const fn is_readable(self) -> bool {
        self.intersects(EventSet::READ)
    }

    /// Returns true if the set includes writable readiness.
    pub const fn is_writable(self) -> bool {
        self.intersects(EventSet::WRITE)
    }

    /// Returns true if the set carries the error bit.
    pub const fn is_error(self) -> bool {
        self.intersects(EventSet::ERROR)
    }
}

impl ops::BitOr for EventSet {
    type Output = EventSet;

    fn bitor(self, other: EventSet) -> EventSet {
        EventSet(self.0 | other.0)
    }
}

impl ops::BitOrAssign for EventSet {
    fn bitor_assign(&mut self, other: EventSet) {
        self.0 |= other.0;
    }
}

impl ops::BitAnd for EventSet {
    type Output = EventSet;

    fn bitand(self, other: EventSet) -> EventSet {
        EventSet(self.0 & other.0)
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }

        const NAMES: &[(EventSet, &str)] = &[
            (EventSet::READ, "READ"),
            (EventSet::WRITE, "WRITE"),
            (EventSet::TIMEOUT, "TIMEOUT"),
            (EventSet::PERIODIC, "PERIODIC"),
            (EventSet::SIGNAL, "SIGNAL"),
            (EventSet::IDLE, "IDLE"),
            (EventSet::CHECK, "CHECK"),
            (EventSet::PREPARE, "PREPARE"),
            (EventSet::CHILD, "CHILD"),
            (EventSet::ERROR, "ERROR"),
        ];

        let mut first = true;
        for &(bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}
