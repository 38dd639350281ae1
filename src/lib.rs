//! A portable event loop.
//!
//! `revent` multiplexes readiness from many sources — file descriptors,
//! relative timers, wall-clock periodics, POSIX signals, child-process
//! state changes, plus idle/prepare/check hooks — onto user callbacks,
//! from a single thread. The kernel side is pluggable: epoll, kqueue,
//! Solaris event ports, `poll(2)` or `select(2)`, picked at runtime.
//!
//! # Example
//!
//! ```
//! use revent::{EventLoop, Flags, RunFlags};
//!
//! # fn main() -> std::io::Result<()> {
//! let mut el = EventLoop::new(Flags::AUTO)?;
//!
//! // Fire once, 10ms from now. One-shot timers stop themselves, and a
//! // loop without active watchers returns from `run`.
//! let timer = el.timer(0.01, 0.0, |_el, _w, _revents| {
//!     println!("tick");
//! });
//! el.start(timer);
//!
//! el.run(RunFlags::WAIT)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Guarantees, briefly
//!
//! Callbacks run on the `run` thread, to completion, in priority order
//! within an iteration. A watcher stopped before its queued event is
//! delivered is never invoked for it. Timer callbacks observe a monotonic
//! now at or past their deadline; periodic watchers follow the wall clock
//! even through clock jumps. Everything stronger than "the callback runs
//! at least once after the event, unless stopped first" is a
//! non-guarantee.

#![cfg(unix)]
#![warn(missing_docs, missing_debug_implementations)]

mod child;
mod event;
mod event_loop;
mod fd;
mod flags;
mod heap;
mod once;
mod periodic;
mod signal;
mod slab;
mod sys;
mod time;
mod timer;
mod watcher;

pub use crate::event::EventSet;
pub use crate::event_loop::EventLoop;
pub use crate::flags::{Flags, RunFlags, Unloop};
pub use crate::sys::BackendKind;
pub use crate::time::{wall_time, Timestamp};
pub use crate::watcher::{Callback, RescheduleFn, Watcher, MAX_PRIORITY, MIN_PRIORITY};

/// The crate's (major, minor) version, for consumers that need to probe
/// behavior at runtime.
pub fn version() -> (u32, u32) {
    (
        env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
    )
}
