use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use revent::{EventSet, RunFlags};

mod util;
use util::{init_with_loop, secs_since};

#[test]
fn one_shot_timer_fires_once_and_loop_exits() {
    let mut el = init_with_loop();
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let w = el.timer(0.05, 0.0, move |el, w, revents| {
        assert!(revents.contains(EventSet::TIMEOUT));
        assert!(!el.is_active(w), "one-shot timer still active in callback");
        *count.borrow_mut() += 1;
    });
    el.start(w);

    let start = Instant::now();
    el.run(RunFlags::WAIT).unwrap();

    assert_eq!(*fired.borrow(), 1);
    assert!(secs_since(start) >= 0.045, "timer fired early");
    assert!(!el.is_active(w));
}

#[test]
fn repeating_timer_keeps_cadence() {
    let mut el = init_with_loop();
    let fires: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    let log = Rc::clone(&fires);
    let w = el.timer(0.01, 0.02, move |el, w, _revents| {
        let mut log = log.borrow_mut();
        log.push(secs_since(start));
        if log.len() == 3 {
            el.stop(w);
        }
    });
    el.start(w);
    el.run(RunFlags::WAIT).unwrap();

    let fires = fires.borrow();
    assert_eq!(fires.len(), 3);
    assert!(fires.windows(2).all(|p| p[0] < p[1]), "fire times not increasing");
    // First deadline 0.01, then two repeats of 0.02 each.
    assert!(fires[2] >= 0.045, "third fire arrived too soon: {:?}", fires);
    for pair in fires.windows(2) {
        assert!(pair[1] - pair[0] >= 0.01, "repeats too close: {:?}", fires);
    }
}

#[test]
fn timer_again_rearms_an_active_timer() {
    let mut el = init_with_loop();
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    // Nominal first deadline far in the future; `timer_again` must replace
    // it with now + repeat.
    let w = el.timer(30.0, 0.02, move |el, w, _revents| {
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(w);
    el.timer_again(w);

    let start = Instant::now();
    el.run(RunFlags::WAIT).unwrap();

    assert_eq!(*fired.borrow(), 1);
    assert!(secs_since(start) < 5.0, "timer_again did not move the deadline");
}

#[test]
fn timer_again_starts_a_stopped_repeating_timer() {
    let mut el = init_with_loop();
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let w = el.timer(30.0, 0.02, move |el, w, _revents| {
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    // Never started; `timer_again` arms it with the repeat interval.
    el.timer_again(w);
    assert!(el.is_active(w));

    let start = Instant::now();
    el.run(RunFlags::WAIT).unwrap();

    assert_eq!(*fired.borrow(), 1);
    assert!(secs_since(start) < 5.0);
}

#[test]
fn periodic_fires_on_interval_boundaries() {
    let mut el = init_with_loop();
    let fires: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&fires);
    // Anchored at the epoch: fires at every multiple of 50ms of wall time.
    let w = el.periodic(0.0, 0.05, move |el, w, revents| {
        assert!(revents.contains(EventSet::PERIODIC));
        let mut log = log.borrow_mut();
        log.push(el.now());
        if log.len() == 2 {
            el.stop(w);
        }
    });
    el.start(w);

    let start = Instant::now();
    el.run(RunFlags::WAIT).unwrap();

    let fires = fires.borrow();
    assert_eq!(fires.len(), 2);
    assert!(fires[1] > fires[0]);
    assert!(secs_since(start) < 2.0);
}

#[test]
fn periodic_reschedule_hook_drives_the_deadline() {
    let mut el = init_with_loop();
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let w = el.periodic_with(
        0.0,
        |_w, now| now + 0.01,
        move |el, w, _revents| {
            let mut count = count.borrow_mut();
            *count += 1;
            if *count == 3 {
                el.stop(w);
            }
        },
    );
    el.start(w);

    let start = Instant::now();
    el.run(RunFlags::WAIT).unwrap();

    assert_eq!(*fired.borrow(), 3);
    assert!(secs_since(start) < 2.0);
}

#[test]
fn stopping_a_timer_restores_the_relative_repeat() {
    let mut el = init_with_loop();
    let fired_at = Rc::new(RefCell::new(None));
    let start = Instant::now();

    let seen = Rc::clone(&fired_at);
    let w = el.timer(0.5, 0.1, move |el, w, _revents| {
        *seen.borrow_mut() = Some(secs_since(start));
        el.stop(w);
    });
    el.start(w);
    el.stop(w);
    // After a stop the watcher reads back its relative repeat, so
    // restarting arms it 0.1s out instead of the original half second.
    el.start(w);
    el.run(RunFlags::WAIT).unwrap();

    let fired_at = fired_at.borrow().expect("timer never fired");
    assert!(fired_at >= 0.09, "fired too early: {}", fired_at);
    assert!(fired_at < 0.45, "stop did not restore the repeat offset");
}
