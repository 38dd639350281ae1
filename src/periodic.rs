use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::time::Timestamp;
use crate::watcher::{Kind, Watcher};

// Offset handed to reschedule callbacks during reify, so "now plus a full
// interval" computations cannot land exactly on the current instant.
const TIME_EPSILON: Timestamp = 1e-4;

impl EventLoop {
    /// Invoke a periodic watcher's reschedule hook. The closure is lifted
    /// out of the record for the call; it has no loop access, so the record
    /// is still there to put it back into.
    fn run_reschedule(&mut self, w: Watcher, now: Timestamp) -> Timestamp {
        let rec = self.watchers.get_mut(w).unwrap();
        let mut hook = match &mut rec.kind {
            Kind::Periodic { reschedule, .. } => {
                reschedule.take().expect("reschedule hook missing")
            }
            _ => unreachable!(),
        };

        let next = hook(w, now);

        match &mut self.watchers.get_mut(w).unwrap().kind {
            Kind::Periodic { reschedule, .. } => *reschedule = Some(hook),
            _ => unreachable!(),
        }
        next
    }

    fn has_reschedule(&self, w: Watcher) -> bool {
        match &self.watchers.get(w).unwrap().kind {
            Kind::Periodic { reschedule, .. } => reschedule.is_some(),
            _ => unreachable!(),
        }
    }

    pub(crate) fn start_periodic(&mut self, w: Watcher) {
        let wall_now = self.wall_now;

        if self.has_reschedule(w) {
            let next = self.run_reschedule(w, wall_now);
            self.watchers.get_mut(w).unwrap().kind.set_deadline(next);
        } else {
            let rec = self.watchers.get_mut(w).unwrap();
            match &mut rec.kind {
                Kind::Periodic { at, interval, .. } => {
                    assert!(*interval >= 0.0, "periodic started with a negative interval");
                    if *interval > 0.0 {
                        // Round up to the next multiple of the interval past
                        // `at`, so e.g. an hourly watcher anchored at :00
                        // fires at the next full hour.
                        *at += ((wall_now - *at) / *interval).ceil() * *interval;
                    }
                }
                _ => unreachable!(),
            }
        }

        self.activate(w, 0);
        self.periodics.push(&mut self.watchers, w);
    }

    pub(crate) fn stop_periodic(&mut self, w: Watcher) {
        let pos = self.watchers.get(w).unwrap().active;
        self.periodics.remove(&mut self.watchers, pos);
        self.deactivate(w);
    }

    /// Expire periodic watchers against the wall clock.
    pub(crate) fn periodics_reify(&mut self) {
        while let Some(w) = self.periodics.root() {
            let rec = self.watchers.get(w).unwrap();
            let at = rec.kind.deadline();
            if at > self.wall_now {
                break;
            }
            debug_assert!(rec.is_active(), "inactive watcher on the periodic heap");

            let interval = match rec.kind {
                Kind::Periodic { interval, .. } => interval,
                _ => unreachable!(),
            };

            if self.has_reschedule(w) {
                let next = self.run_reschedule(w, self.wall_now + TIME_EPSILON);
                assert!(
                    next > self.wall_now,
                    "periodic reschedule hook returned a deadline in the past"
                );
                self.watchers.get_mut(w).unwrap().kind.set_deadline(next);
                self.periodics.adjust(&mut self.watchers, 1);
            } else if interval > 0.0 {
                // `+ 1.0` instead of a bare ceil: guarantees strict progress
                // even when the deadline lands exactly on a boundary.
                let next = at + ((self.wall_now - at) / interval + 1.0).floor() * interval;
                assert!(
                    next > self.wall_now,
                    "periodic deadline failed to advance; negative interval?"
                );
                self.watchers.get_mut(w).unwrap().kind.set_deadline(next);
                self.periodics.adjust(&mut self.watchers, 1);
            } else {
                self.stop(w);
            }

            self.feed_event(w, EventSet::PERIODIC);
        }
    }

    /// The wall clock jumped: recompute every periodic deadline from the
    /// new time, then repair the heap in one pass.
    pub(crate) fn periodics_reschedule(&mut self) {
        let wall_now = self.wall_now;

        for k in 0..self.periodics.len() {
            let w = self.periodics.items()[k];

            if self.has_reschedule(w) {
                let next = self.run_reschedule(w, wall_now);
                self.watchers.get_mut(w).unwrap().kind.set_deadline(next);
            } else {
                let rec = self.watchers.get_mut(w).unwrap();
                match &mut rec.kind {
                    Kind::Periodic { at, interval, .. } => {
                        if *interval > 0.0 {
                            *at += ((wall_now - *at) / *interval).ceil() * *interval;
                        }
                    }
                    _ => unreachable!(),
                }
            }
        }

        self.periodics.heapify(&mut self.watchers);
    }
}
