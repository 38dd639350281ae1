use std::cell::RefCell;
use std::rc::Rc;

use revent::{EventSet, RunFlags, Unloop, MAX_PRIORITY, MIN_PRIORITY};

mod util;
use util::init_with_loop;

#[test]
fn higher_priority_fires_first_within_an_iteration() {
    let mut el = init_with_loop();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    // Two timers with the same deadline expire in the same iteration; the
    // +2 watcher must be dispatched before the -2 one regardless of start
    // order.
    let lo_order = Rc::clone(&order);
    let lo = el.timer(0.01, 0.0, move |_el, _w, _revents| {
        lo_order.borrow_mut().push("low");
    });
    el.set_priority(lo, MIN_PRIORITY);

    let hi_order = Rc::clone(&order);
    let hi = el.timer(0.01, 0.0, move |_el, _w, _revents| {
        hi_order.borrow_mut().push("high");
    });
    el.set_priority(hi, MAX_PRIORITY);

    el.start(lo);
    el.start(hi);
    el.run(RunFlags::WAIT).unwrap();

    assert_eq!(*order.borrow(), vec!["high", "low"]);
}

#[test]
fn prepare_runs_before_poll_and_check_after() {
    let mut el = init_with_loop();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&order);
    let prep = el.prepare(move |_el, _w, revents| {
        assert_eq!(revents, EventSet::PREPARE);
        log.borrow_mut().push("prepare");
    });
    let log = Rc::clone(&order);
    let check = el.check(move |el, _w, revents| {
        assert_eq!(revents, EventSet::CHECK);
        log.borrow_mut().push("check");
        el.unloop(Unloop::Once);
    });
    el.start(prep);
    el.start(check);

    // Non-blocking: with no timers armed a plain iteration would sit in
    // the backend for the full block interval.
    el.run(RunFlags::NONBLOCK).unwrap();

    assert_eq!(*order.borrow(), vec!["prepare", "check"]);
    el.stop(prep);
    el.stop(check);
}

#[test]
fn idle_runs_only_when_nothing_else_is_pending() {
    let mut el = init_with_loop();
    let idles = Rc::new(RefCell::new(0));
    let timeouts = Rc::new(RefCell::new(0));

    let count = Rc::clone(&idles);
    let idle = el.idle(move |_el, _w, _revents| {
        *count.borrow_mut() += 1;
    });
    el.start(idle);

    // The timer is ready immediately, so the first iteration has pending
    // work and must skip the idle watcher.
    let count = Rc::clone(&timeouts);
    let timer = el.timer(0.0, 0.0, move |_el, _w, _revents| {
        *count.borrow_mut() += 1;
    });
    el.start(timer);

    el.run(RunFlags::ONESHOT).unwrap();
    assert_eq!(*timeouts.borrow(), 1);
    assert_eq!(*idles.borrow(), 0, "idle ran in a busy iteration");

    // With the timer gone the next iteration is empty and idles.
    el.run(RunFlags::ONESHOT).unwrap();
    assert_eq!(*idles.borrow(), 1);

    el.stop(idle);
}

#[test]
fn unloop_all_unwinds_nested_runs() {
    let mut el = init_with_loop();
    let outers = Rc::new(RefCell::new(0));
    let breakers = Rc::new(RefCell::new(0));

    // An idle watcher keeps every iteration non-blocking.
    let idle = el.idle(|_el, _w, _revents| {});
    el.start(idle);

    // High priority: re-enters the loop once. The nested iteration runs the
    // low-priority breaker, whose `All` must unwind the nested *and* the
    // outer run.
    let count = Rc::clone(&outers);
    let nester = el.check(move |el, _w, _revents| {
        if *count.borrow() == 0 {
            *count.borrow_mut() += 1;
            el.run(RunFlags::ONESHOT).unwrap();
        } else {
            *count.borrow_mut() += 1;
        }
    });
    el.set_priority(nester, MAX_PRIORITY);
    el.start(nester);

    let count = Rc::clone(&breakers);
    let breaker = el.check(move |el, _w, _revents| {
        *count.borrow_mut() += 1;
        el.unloop(Unloop::All);
    });
    el.set_priority(breaker, MIN_PRIORITY);
    el.start(breaker);

    el.run(RunFlags::WAIT).unwrap();

    // Had the nested `All` not latched through the outer run, the outer
    // loop would have dispatched the nester a second time.
    assert_eq!(*outers.borrow(), 1);
    assert_eq!(*breakers.borrow(), 1);

    el.stop(nester);
    el.stop(breaker);
    el.stop(idle);
}
