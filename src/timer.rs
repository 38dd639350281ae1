use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::watcher::{Kind, Watcher};

impl EventLoop {
    pub(crate) fn start_timer(&mut self, w: Watcher) {
        let mono_now = self.mono_now;
        let rec = self.watchers.get_mut(w).unwrap();
        match &mut rec.kind {
            Kind::Timer { at, repeat } => {
                assert!(*repeat >= 0.0, "timer started with a negative repeat");
                // Relative offset becomes an absolute monotonic deadline.
                *at += mono_now;
            }
            _ => unreachable!(),
        }
        self.activate(w, 0);
        self.timers.push(&mut self.watchers, w);
    }

    pub(crate) fn stop_timer(&mut self, w: Watcher) {
        let pos = self.watchers.get(w).unwrap().active;
        self.timers.remove(&mut self.watchers, pos);
        let rec = self.watchers.get_mut(w).unwrap();
        match &mut rec.kind {
            // Leave the relative repeat value behind so a stopped watcher
            // reads back a relative time, not a stale absolute deadline.
            Kind::Timer { at, repeat } => *at = *repeat,
            _ => unreachable!(),
        }
        self.deactivate(w);
    }

    /// Re-arm a repeating timer without the stop/start dance.
    ///
    /// Active with a positive repeat: the deadline becomes now + repeat.
    /// Active without a repeat: the timer is stopped. Inactive with a
    /// positive repeat: the timer is started.
    pub fn timer_again(&mut self, w: Watcher) {
        let mono_now = self.mono_now;
        let rec = self.record_mut(w);
        let (active, repeat) = match rec.kind {
            Kind::Timer { repeat, .. } => (rec.active != 0, repeat),
            _ => panic!("timer_again on a non-timer watcher"),
        };

        if active {
            if repeat > 0.0 {
                let pos = rec.active;
                rec.kind.set_deadline(mono_now + repeat);
                self.timers.adjust(&mut self.watchers, pos);
            } else {
                self.stop(w);
            }
        } else if repeat > 0.0 {
            self.record_mut(w).kind.set_deadline(repeat);
            self.start(w);
        }
    }

    /// Expire timers against the monotonic clock: re-arm repeating ones,
    /// stop the rest, feed `TIMEOUT` either way.
    pub(crate) fn timers_reify(&mut self) {
        while let Some(w) = self.timers.root() {
            let rec = self.watchers.get(w).unwrap();
            let at = rec.kind.deadline();
            // Strictly less than: the late re-arm below clamps to mono_now,
            // and an equal deadline re-expiring here would never let the
            // loop make progress.
            if at >= self.mono_now {
                break;
            }
            debug_assert!(rec.is_active(), "inactive timer on the timer heap");

            let repeat = match rec.kind {
                Kind::Timer { repeat, .. } => repeat,
                _ => unreachable!(),
            };

            if repeat > 0.0 {
                // Keep the cadence when we are on time; when the callback
                // or a long poll made us late, restart from now instead of
                // firing a burst of catch-up events.
                let next = (at + repeat).max(self.mono_now);
                self.watchers.get_mut(w).unwrap().kind.set_deadline(next);
                self.timers.adjust(&mut self.watchers, 1);
            } else {
                self.stop(w);
            }

            self.feed_event(w, EventSet::TIMEOUT);
        }
    }
}
