//! Thin bridge between raw preopened descriptors and the rest of the
//! engine: puts a descriptor into non-blocking mode and exposes it as
//! `Read`/`Write`.
//!
//! This plays the role the original C library delegates to APR: it is
//! intentionally minimal, since everything interesting happens one
//! layer up in `control`, `body` and `engine`.
use std::io;
use std::os::unix::io::RawFd;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{read, write, close};
use nix::errno::Errno;

/// A raw descriptor, switched to non-blocking mode on construction and
/// closed on drop.
#[derive(Debug)]
pub struct Fd {
    raw: RawFd,
}

fn set_nonblocking(raw: RawFd) -> io::Result<()> {
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(to_io)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(to_io)?;
    Ok(())
}

fn to_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}

impl Fd {
    /// Wrap a preopened descriptor, putting it into non-blocking mode.
    pub fn new(raw: RawFd) -> io::Result<Fd> {
        set_nonblocking(raw)?;
        Ok(Fd { raw })
    }

    pub fn raw(&self) -> RawFd {
        self.raw
    }

    /// A single non-blocking read. `Ok(0)` means EOF, `Err` with
    /// `ErrorKind::WouldBlock` means the caller should poll and retry.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match read(self.raw, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(to_io(e)),
            }
        }
    }

    /// A single non-blocking write.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match write(self.raw, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(to_io(e)),
            }
        }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        let _ = close(self.raw);
    }
}

impl io::Read for Fd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Fd::read(self, buf)
    }
}

impl io::Write for Fd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Fd::write(self, buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn is_would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}
