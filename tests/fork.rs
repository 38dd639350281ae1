use std::cell::RefCell;
use std::rc::Rc;

use revent::{EventSet, RunFlags};

mod util;
use util::{init_with_loop, TestPipe};

#[test]
fn post_fork_rebuilds_backend_state_without_losing_watchers() {
    let mut el = init_with_loop();
    let pipe = Rc::new(TestPipe::new());
    let fired = Rc::new(RefCell::new(0));

    let count = Rc::clone(&fired);
    let drainer = Rc::clone(&pipe);
    let io = el.io(pipe.read, EventSet::READ, move |el, w, revents| {
        assert!(revents.is_readable());
        drainer.drain();
        *count.borrow_mut() += 1;
        el.stop(w);
    });
    el.start(io);

    // One pass so the fd is registered with the kernel object that the
    // handoff is about to throw away.
    el.run(RunFlags::NONBLOCK).unwrap();
    assert_eq!(*fired.borrow(), 0);
    let backend = el.backend();

    el.post_fork();

    // Readiness arriving after the fork must be seen through the rebuilt
    // backend.
    pipe.put(b'f');
    el.run(RunFlags::ONESHOT).unwrap();

    assert_eq!(*fired.borrow(), 1, "watcher lost across the fork handoff");
    assert_eq!(el.backend(), backend);

    // The watcher survived as a registration and can be re-armed.
    el.start(io);
    el.run(RunFlags::NONBLOCK).unwrap();
    assert_eq!(*fired.borrow(), 1);
    el.stop(io);
}
