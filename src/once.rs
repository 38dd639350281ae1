use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::time::Timestamp;
use crate::watcher::Watcher;

struct OnceState {
    io: Option<Watcher>,
    timer: Option<Watcher>,
    cb: Option<Box<dyn FnOnce(&mut EventLoop, EventSet)>>,
}

fn fire(el: &mut EventLoop, state: &Rc<RefCell<OnceState>>, revents: EventSet) {
    let (io, timer, cb) = {
        let mut state = state.borrow_mut();
        let cb = match state.cb.take() {
            Some(cb) => cb,
            // The other half won the race within the same drain.
            None => return,
        };
        (state.io.take(), state.timer.take(), cb)
    };

    // Tearing down both halves drops their closures, and with them the last
    // strong references to the shared state.
    if let Some(w) = io {
        el.destroy(w);
    }
    if let Some(w) = timer {
        el.destroy(w);
    }

    cb(el, revents);
}

impl EventLoop {
    /// Watch `fd` and/or a timeout, whichever fires first, and call `cb`
    /// exactly once with the triggering revents. Both underlying watchers
    /// are torn down before the callback runs.
    ///
    /// Pass `fd: None` for a pure timeout, `timeout: None` to wait on the
    /// fd alone. With neither armed the callback never runs.
    pub fn once<F>(
        &mut self,
        fd: Option<RawFd>,
        events: EventSet,
        timeout: Option<Timestamp>,
        cb: F,
    ) where
        F: FnOnce(&mut EventLoop, EventSet) + 'static,
    {
        let state = Rc::new(RefCell::new(OnceState {
            io: None,
            timer: None,
            cb: Some(Box::new(cb)),
        }));

        if let Some(fd) = fd {
            let hook = Rc::clone(&state);
            let w = self.io(fd, events, move |el, _w, revents| {
                fire(el, &hook, revents);
            });
            state.borrow_mut().io = Some(w);
            self.start(w);
        }

        if let Some(timeout) = timeout {
            let hook = Rc::clone(&state);
            let w = self.timer(timeout, 0.0, move |el, _w, revents| {
                fire(el, &hook, revents);
            });
            state.borrow_mut().timer = Some(w);
            self.start(w);
        }
    }
}
