//! Detaches the current process from its controlling terminal: fork once
//! so the parent can exit immediately, `setsid` in the child, then
//! redirect the standard streams to `/dev/null`. Mirrors the original
//! tool's `background()`, adapted to std's process primitives.

use std::ffi::CString;
use std::io;
use std::os::fd::RawFd;

/// Forks into the background. Returns in the child only; the parent
/// process calls `std::process::exit(0)` directly from here, so callers
/// should invoke this before opening any resource the parent must not
/// also hold (sockets, the PID file).
pub fn daemonize() -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {} // child continues below
        _ => std::process::exit(0),
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }

    redirect_stdio_to_null()?;

    Ok(())
}

fn redirect_stdio_to_null() -> io::Result<()> {
    let path = CString::new("/dev/null").unwrap();
    let null_fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if null_fd == -1 {
        return Err(io::Error::last_os_error());
    }

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        dup2(null_fd, fd)?;
    }

    if null_fd > libc::STDERR_FILENO {
        unsafe { libc::close(null_fd) };
    }

    Ok(())
}

fn dup2(from: RawFd, to: RawFd) -> io::Result<()> {
    if unsafe { libc::dup2(from, to) } == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}
