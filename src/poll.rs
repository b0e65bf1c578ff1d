//! `poll(2)` readiness wrapper used by the control channel and the body
//! pipes to multiplex "is my fd ready" with "did a control packet
//! arrive" (§4.3.5, §5).
use std::io;
use std::os::unix::io::RawFd;

use nix::poll::{poll, PollFd, PollFlags};
use nix::errno::Errno;

/// Outcome of waiting on one or more descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    /// At least one watched descriptor became ready.
    Some,
    /// The timeout expired first.
    Timeout,
}

/// Wait until `fd` is readable, or `timeout_ms` elapses (`-1` = forever,
/// `0` = non-blocking peek).
pub fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<Ready> {
    wait_one(fd, PollFlags::POLLIN, timeout_ms)
}

/// Wait until `fd` is writable, or `timeout_ms` elapses.
pub fn wait_writable(fd: RawFd, timeout_ms: i32) -> io::Result<Ready> {
    wait_one(fd, PollFlags::POLLOUT, timeout_ms)
}

fn wait_one(fd: RawFd, events: PollFlags, timeout_ms: i32) -> io::Result<Ready> {
    wait_any(&[(fd, events)], timeout_ms)
}

/// Wait until any of `fds` becomes ready for its requested events, or
/// `timeout_ms` elapses. Used to watch a body pipe and the control
/// socket in the same call (§4.3.5).
pub fn wait_any(fds: &[(RawFd, PollFlags)], timeout_ms: i32) -> io::Result<Ready> {
    let mut pollfds: Vec<PollFd> = fds.iter()
        .map(|&(fd, events)| PollFd::new(fd, events))
        .collect();
    loop {
        match poll(&mut pollfds, timeout_ms) {
            Ok(0) => return Ok(Ready::Timeout),
            Ok(_) => return Ok(Ready::Some),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_io(e)),
        }
    }
}

/// Which of a set of watched descriptors actually became ready.
pub fn readiness(fds: &[(RawFd, PollFlags)], timeout_ms: i32)
    -> io::Result<(Ready, Vec<bool>)>
{
    let mut pollfds: Vec<PollFd> = fds.iter()
        .map(|&(fd, events)| PollFd::new(fd, events))
        .collect();
    loop {
        match poll(&mut pollfds, timeout_ms) {
            Ok(0) => return Ok((Ready::Timeout, vec![false; fds.len()])),
            Ok(_) => {
                let flags = pollfds.iter()
                    .map(|p| p.revents()
                        .map(|r| !r.is_empty())
                        .unwrap_or(false))
                    .collect();
                return Ok((Ready::Some, flags));
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_io(e)),
        }
    }
}

fn to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}
