// Not all helpers are used by every test binary.
#![allow(dead_code)]

use std::os::unix::io::RawFd;
use std::sync::Once;
use std::time::Instant;

use revent::{EventLoop, Flags};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub fn init_with_loop() -> EventLoop {
    init();
    EventLoop::new(Flags::AUTO).expect("unable to create an event loop")
}

/// A pipe with both ends close-on-exec; the read end is non-blocking so
/// tests can drain it without risk of hanging.
pub struct TestPipe {
    pub read: RawFd,
    pub write: RawFd,
}

impl TestPipe {
    pub fn new() -> TestPipe {
        let mut fds = [0 as RawFd; 2];
        let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(res, 0, "unable to create a pipe");
        unsafe {
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
        }
        TestPipe {
            read: fds[0],
            write: fds[1],
        }
    }

    pub fn put(&self, byte: u8) {
        let res = unsafe { libc::write(self.write, &byte as *const u8 as *const _, 1) };
        assert_eq!(res, 1, "unable to write to the pipe");
    }

    pub fn drain(&self) -> usize {
        let mut total = 0;
        let mut buf = [0u8; 64];
        loop {
            let res = unsafe { libc::read(self.read, buf.as_mut_ptr() as *mut _, buf.len()) };
            if res <= 0 {
                return total;
            }
            total += res as usize;
        }
    }
}

impl Drop for TestPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

/// Seconds elapsed since `start`, as the crate measures time.
pub fn secs_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}
