use std::cell::RefCell;
use std::rc::Rc;

use revent::{EventSet, RunFlags};

mod util;
use util::{init_with_loop, TestPipe};

#[test]
fn pipe_read_fires_once_and_drains() {
    let mut el = init_with_loop();
    let pipe = Rc::new(TestPipe::new());
    let fired = Rc::new(RefCell::new(0));

    // A prepare hook supplies the byte from inside the loop, before the
    // first poll.
    let feeder = Rc::clone(&pipe);
    let wrote = Rc::new(RefCell::new(false));
    let once = Rc::clone(&wrote);
    let prep = el.prepare(move |_el, _w, _revents| {
        if !*once.borrow() {
            feeder.put(b'x');
            *once.borrow_mut() = true;
        }
    });
    el.start(prep);

    let count = Rc::clone(&fired);
    let drainer = Rc::clone(&pipe);
    let io = el.io(pipe.read, EventSet::READ, move |el, w, revents| {
        assert!(revents.is_readable());
        assert_eq!(drainer.drain(), 1);
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(io);

    el.run(RunFlags::ONESHOT).unwrap();
    assert_eq!(*fired.borrow(), 1);

    // The byte is gone; re-arming the watcher must not produce a second
    // event.
    el.start(io);
    el.run(RunFlags::NONBLOCK).unwrap();
    assert_eq!(*fired.borrow(), 1);

    el.stop(io);
    el.stop(prep);
}

#[test]
fn level_triggered_until_drained() {
    let mut el = init_with_loop();
    let pipe = Rc::new(TestPipe::new());
    pipe.put(b'a');

    let fired = Rc::new(RefCell::new(0));
    let count = Rc::clone(&fired);
    let drainer = Rc::clone(&pipe);
    let io = el.io(pipe.read, EventSet::READ, move |el, w, _revents| {
        let mut count = count.borrow_mut();
        *count += 1;
        if *count == 2 {
            // Only drain on the second delivery; the first one left the
            // byte in place, so the loop had to report it again.
            assert_eq!(drainer.drain(), 1);
            el.stop(w);
        }
    });
    el.start(io);

    el.run(RunFlags::ONESHOT).unwrap();
    el.run(RunFlags::ONESHOT).unwrap();
    assert_eq!(*fired.borrow(), 2);
}

#[test]
fn write_interest_reported_on_an_empty_pipe() {
    let mut el = init_with_loop();
    let pipe = TestPipe::new();
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let io = el.io(pipe.write, EventSet::WRITE, move |el, w, revents| {
        assert!(revents.is_writable());
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(io);

    el.run(RunFlags::WAIT).unwrap();
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn dead_fd_reports_error_and_stops_the_watcher() {
    let mut el = init_with_loop();

    // A freshly closed fd number: registration with the kernel must fail
    // and the watcher is killed with the full error set.
    let pipe = TestPipe::new();
    let dead = unsafe { libc::dup(pipe.read) };
    unsafe { libc::close(dead) };

    let seen = Rc::new(RefCell::new(EventSet::NONE));
    let log = Rc::clone(&seen);
    let io = el.io(dead, EventSet::READ, move |_el, _w, revents| {
        *log.borrow_mut() = revents;
    });
    el.start(io);

    el.run(RunFlags::ONESHOT).unwrap();

    assert_eq!(
        *seen.borrow(),
        EventSet::ERROR | EventSet::READ | EventSet::WRITE
    );
    assert!(!el.is_active(io));
}

#[test]
fn two_watchers_share_one_fd() {
    let mut el = init_with_loop();
    let pipe = Rc::new(TestPipe::new());
    pipe.put(b'z');

    let hits = Rc::new(RefCell::new(0));

    let a_hits = Rc::clone(&hits);
    let a = el.io(pipe.read, EventSet::READ, move |el, w, _revents| {
        *a_hits.borrow_mut() += 1;
        el.stop(w);
    });
    let b_hits = Rc::clone(&hits);
    let b = el.io(pipe.read, EventSet::READ, move |el, w, _revents| {
        *b_hits.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(a);
    el.start(b);

    el.run(RunFlags::ONESHOT).unwrap();
    assert_eq!(*hits.borrow(), 2, "both watchers see the same readiness");
}
