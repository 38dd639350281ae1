use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};

use revent::{EventLoop, EventSet, Flags, RunFlags};

mod util;
use util::init;

// The default loop (and with it the process-wide signal machinery) is a
// singleton; run these tests one at a time.
static DEFAULT_LOOP: Mutex<()> = Mutex::new(());

fn default_guard() -> MutexGuard<'static, ()> {
    DEFAULT_LOOP.lock().unwrap_or_else(|err| err.into_inner())
}

fn init_with_default_loop() -> EventLoop {
    init();
    EventLoop::new_default(Flags::AUTO).expect("unable to create the default loop")
}

#[test]
fn internal_watchers_do_not_keep_the_loop_alive() {
    let _guard = default_guard();
    let mut el = init_with_default_loop();

    // The signal pipe watcher and the SIGCHLD reaper are both ref-neutral:
    // with nothing of the user's registered, run returns at once.
    el.run(RunFlags::WAIT).unwrap();
}

#[test]
fn only_one_default_loop_at_a_time() {
    let _guard = default_guard();
    let el = init_with_default_loop();

    let err = EventLoop::new_default(Flags::AUTO).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    drop(el);

    // The claim is released on drop.
    let el = init_with_default_loop();
    assert!(el.is_default());
}

#[test]
fn signal_watchers_require_the_default_loop() {
    init();
    let mut el = EventLoop::new(Flags::AUTO).unwrap();
    let w = el.signal(libc::SIGUSR2, |_el, _w, _revents| {});
    let panic = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        el.start(w);
    }));
    assert!(panic.is_err());
}

#[test]
fn raising_a_signal_twice_coalesces() {
    let _guard = default_guard();
    let mut el = init_with_default_loop();

    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let sig = el.signal(libc::SIGUSR1, move |el, w, revents| {
        assert!(revents.contains(EventSet::SIGNAL));
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(sig);

    // Raise from a prepare hook so delivery happens while the loop runs;
    // two raises before the pipe is drained must collapse into one
    // callback.
    let raised = Rc::new(RefCell::new(false));
    let once = Rc::clone(&raised);
    let prep = el.prepare(move |_el, _w, _revents| {
        if !*once.borrow() {
            *once.borrow_mut() = true;
            unsafe {
                libc::raise(libc::SIGUSR1);
                libc::raise(libc::SIGUSR1);
            }
        }
    });
    el.start(prep);

    // Failsafe so a lost signal cannot hang the test run.
    let deadline = el.timer(5.0, 0.0, |el, _w, _revents| {
        el.unloop(revent::Unloop::All);
    });
    el.start(deadline);

    while el.run(RunFlags::ONESHOT).is_ok() {
        if *fired.borrow() > 0 || !el.is_active(deadline) {
            break;
        }
    }

    assert_eq!(*fired.borrow(), 1, "two raises must coalesce into one event");

    if el.is_active(deadline) {
        el.stop(deadline);
    }
    el.stop(prep);
    el.stop(sig);
}

#[test]
fn feed_signal_event_delivers_to_every_watcher() {
    let _guard = default_guard();
    let mut el = init_with_default_loop();

    let hits = Rc::new(RefCell::new(0));

    let mut watchers = Vec::new();
    for _ in 0..3 {
        let count = Rc::clone(&hits);
        let w = el.signal(libc::SIGUSR2, move |_el, _w, _revents| {
            *count.borrow_mut() += 1;
        });
        el.start(w);
        watchers.push(w);
    }

    el.feed_signal_event(libc::SIGUSR2);
    el.run(RunFlags::NONBLOCK).unwrap();

    assert_eq!(*hits.borrow(), 3);
    for w in watchers {
        el.stop(w);
    }
}
