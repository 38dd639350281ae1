use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd};

/// Create the self-pipe: both ends close-on-exec and non-blocking, returned
/// as `(read, write)`.
pub(crate) fn new() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "solaris"
    ))]
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK))?;

    // No `pipe2(2)` on Darwin; set the flags one fcntl at a time. The race
    // against a concurrent exec is accepted, same as every other user of
    // this pattern on these platforms.
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    {
        syscall!(pipe(fds.as_mut_ptr()))?;
        for fd in &fds {
            if let Err(err) = syscall!(fcntl(*fd, libc::F_SETFD, libc::FD_CLOEXEC))
                .and_then(|_| syscall!(fcntl(*fd, libc::F_SETFL, libc::O_NONBLOCK)))
            {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(err);
            }
        }
    }

    // SAFETY: pipe(2)/pipe2(2) returned two valid, owned descriptors.
    let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    Ok((read, write))
}
