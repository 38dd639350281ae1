use crate::event_loop::EventLoop;

/// A point in time or a span of time, in seconds.
///
/// Both clocks of the loop — wall and monotonic — use this representation,
/// which keeps microsecond precision for over a century and makes deadline
/// arithmetic plain floating-point math.
pub type Timestamp = f64;

/// Smallest wall-clock discontinuity treated as a jump.
pub(crate) const MIN_TIMEJUMP: Timestamp = 1.0;

/// Upper bound on a single backend sleep. Bounded so that wall-clock jumps
/// are noticed within a reasonable span even on an otherwise idle loop.
pub(crate) const MAX_BLOCKTIME: Timestamp = 59.731;

/// Sample the wall clock.
///
/// This is the time base of periodic watchers and of [`EventLoop::now`],
/// which returns the cached value instead of re-sampling.
pub fn wall_time() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } == 0 {
        return ts.tv_sec as Timestamp + ts.tv_nsec as Timestamp * 1e-9;
    }

    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };
    tv.tv_sec as Timestamp + tv.tv_usec as Timestamp * 1e-6
}

/// Sample the monotonic clock. Callers fall back to [`wall_time`] when the
/// probe at loop construction failed.
pub(crate) fn monotonic_time() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } == 0 {
        ts.tv_sec as Timestamp + ts.tv_nsec as Timestamp * 1e-9
    } else {
        wall_time()
    }
}

/// Check once whether `CLOCK_MONOTONIC` works on this system.
pub(crate) fn probe_monotonic() -> bool {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) == 0 }
}

impl EventLoop {
    /// Refresh both cached clocks from the monotonic source. Returns true
    /// when the wall clock had to be re-sampled, i.e. the caller must
    /// cross-check for a jump.
    pub(crate) fn update_time_monotonic(&mut self) -> bool {
        self.mono_now = monotonic_time();

        if self.mono_now - self.now_floor < MIN_TIMEJUMP * 0.5 {
            // Extrapolating from the last known offset is both cheaper and
            // smoother than re-sampling the wall clock.
            self.wall_now = self.wall_mono_diff + self.mono_now;
            false
        } else {
            self.now_floor = self.mono_now;
            self.wall_now = wall_time();
            true
        }
    }

    /// Post-poll clock update with jump detection.
    ///
    /// With a monotonic clock, a wall-clock jump re-bases every periodic
    /// watcher and leaves relative timers alone. Without one, a detected
    /// jump additionally shifts every timer deadline by the jump size so
    /// relative semantics survive.
    pub(crate) fn update_time(&mut self) {
        if self.have_monotonic {
            if self.update_time_monotonic() {
                let old_diff = self.wall_mono_diff;

                // Sample a few times before declaring a jump; the two
                // clocks are read at slightly different instants and a
                // scheduling hiccup between the reads must not count.
                for _ in 0..3 {
                    self.wall_mono_diff = self.wall_now - self.mono_now;

                    if (old_diff - self.wall_mono_diff).abs() < MIN_TIMEJUMP {
                        return;
                    }

                    self.wall_now = wall_time();
                    self.mono_now = monotonic_time();
                    self.now_floor = self.mono_now;
                }

                log::trace!(
                    "wall clock jumped by {:+.3}s, re-basing periodic watchers",
                    self.wall_mono_diff - old_diff
                );
                self.periodics_reschedule();
            }
        } else {
            self.wall_now = wall_time();

            if self.mono_now > self.wall_now
                || self.mono_now < self.wall_now - MAX_BLOCKTIME - MIN_TIMEJUMP
            {
                log::trace!("wall clock jumped while running without a monotonic clock");
                self.periodics_reschedule();

                // Every relative deadline moves by the same amount, so the
                // heap order is preserved.
                let shift = self.wall_now - self.mono_now;
                for k in 0..self.timers.len() {
                    let w = self.timers.items()[k];
                    let rec = self.watchers.get_mut(w).unwrap();
                    rec.kind.shift_deadline(shift);
                }
            }

            self.mono_now = self.wall_now;
        }
    }
}
