//! Non-blocking transfer over the request/response body pipes, with flow
//! accounting and a `splice(2)`-based zero-copy fast path (§4.5).
use std::io;

use error::Error;
use fd::{Fd, is_would_block};

fn would_block() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::WouldBlock, "would block"))
}

/// Flow accounting for the request body pipe.
///
/// `announced` is `None` until a `LENGTH` packet (or equivalent
/// determination) fixes it; `remaining()` then reports `-1`, matching
/// the reference API's sentinel for "unknown".
#[derive(Debug, Clone, Copy, Default)]
pub struct InputStats {
    announced: Option<u64>,
    received: u64,
    eof: bool,
    premature: bool,
}

impl InputStats {
    pub fn announced(&self) -> Option<u64> { self.announced }
    pub fn received(&self) -> u64 { self.received }
    pub fn eof(&self) -> bool { self.eof }

    /// True if the body ended because the peer sent `PREMATURE` rather
    /// than because the announced length was fully received.
    pub fn premature(&self) -> bool { self.premature }

    /// `announced - received`, or `-1` if the length is undetermined.
    pub fn remaining(&self) -> i64 {
        match self.announced {
            Some(n) => (n - self.received) as i64,
            None => -1,
        }
    }

    /// True unless the body is known to be empty or already exhausted.
    pub fn has_body(&self) -> bool {
        match self.announced {
            Some(n) => n > 0,
            None => !self.eof,
        }
    }
}

/// Flow accounting for the response body pipe.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputStats {
    announced: Option<u64>,
    sent: u64,
    began: bool,
    no_body: bool,
}

impl OutputStats {
    pub fn announced(&self) -> Option<u64> { self.announced }
    pub fn sent(&self) -> u64 { self.sent }
    pub fn began(&self) -> bool { self.began }
    pub fn no_body(&self) -> bool { self.no_body }

    /// True if an announced length was set and doesn't match what was
    /// actually sent — the fatal case `end()` turns into `ABORT` (§4.3.4).
    pub fn length_mismatch(&self) -> bool {
        match self.announced {
            Some(n) => n != self.sent,
            None => false,
        }
    }
}

/// The request body pipe, held non-blocking.
pub struct InputBody {
    fd: Fd,
    stats: InputStats,
    closing: bool,
}

impl InputBody {
    pub fn new(fd: Fd) -> InputBody {
        InputBody { fd, stats: InputStats::default(), closing: false }
    }

    pub fn raw_fd(&self) -> ::std::os::unix::io::RawFd {
        self.fd.raw()
    }

    pub fn stats(&self) -> InputStats { self.stats }

    pub fn has_body(&self) -> bool { self.stats.has_body() }

    pub fn remaining(&self) -> i64 { self.stats.remaining() }

    pub fn set_announced(&mut self, n: u64) {
        self.stats.announced = Some(n);
        if n == 0 {
            self.stats.eof = true;
        }
    }

    pub fn mark_no_body(&mut self) {
        self.stats.announced = Some(0);
        self.stats.eof = true;
    }

    /// The peer ended the body early (`PREMATURE`); whatever has been
    /// received is all there is.
    pub fn mark_premature(&mut self) {
        self.stats.announced = Some(self.stats.received);
        self.stats.eof = true;
        self.stats.premature = true;
    }

    pub fn is_closing(&self) -> bool { self.closing }

    pub fn begin_close(&mut self) { self.closing = true; }

    /// Reset accounting for the next accepted request; the underlying
    /// pipe fd is reused across requests.
    pub fn reset(&mut self) {
        self.stats = InputStats::default();
        self.closing = false;
    }

    /// One non-blocking read attempt. `Err` with an `io::ErrorKind::WouldBlock`
    /// inner error means the caller should `input_poll` and retry.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.stats.eof {
            return Ok(0);
        }
        match self.fd.read(buf) {
            Ok(0) => {
                self.stats.eof = true;
                Ok(0)
            }
            Ok(n) => {
                self.note_received(n as u64);
                Ok(n)
            }
            Err(ref e) if is_would_block(e) => Err(would_block()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Record bytes the application consumed by reading the raw fd
    /// itself (`received()` in the reference API).
    pub fn note_received(&mut self, n: u64) {
        self.stats.received += n;
        if let Some(a) = self.stats.announced {
            if self.stats.received >= a {
                self.stats.eof = true;
            }
        }
    }
}

/// The response body pipe, held non-blocking.
pub struct OutputBody {
    fd: Fd,
    stats: OutputStats,
    aborted: bool,
}

impl OutputBody {
    pub fn new(fd: Fd) -> OutputBody {
        OutputBody { fd, stats: OutputStats::default(), aborted: false }
    }

    pub fn raw_fd(&self) -> ::std::os::unix::io::RawFd {
        self.fd.raw()
    }

    pub fn stats(&self) -> OutputStats { self.stats }

    pub fn set_announced(&mut self, n: u64) {
        self.stats.announced = Some(n);
    }

    pub fn mark_began(&mut self) { self.stats.began = true; }

    pub fn mark_no_body(&mut self) { self.stats.no_body = true; }

    /// Peer sent `STOP`: further writes fail (§4.3.5).
    pub fn mark_aborted(&mut self) { self.aborted = true; }

    pub fn is_aborted(&self) -> bool { self.aborted }

    /// Reset accounting for the next accepted request; the underlying
    /// pipe fd is reused across requests.
    pub fn reset(&mut self) {
        self.stats = OutputStats::default();
        self.aborted = false;
    }

    /// One non-blocking write attempt.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.aborted {
            return Err(Error::Usage("output pipe stopped by peer"));
        }
        if let Some(a) = self.stats.announced {
            if self.stats.sent + buf.len() as u64 > a {
                return Err(Error::Protocol("write would exceed announced length"));
            }
        }
        match self.fd.write(buf) {
            Ok(n) => {
                self.note_sent(n as u64);
                Ok(n)
            }
            Err(ref e) if is_would_block(e) => Err(would_block()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Record bytes the application sent by writing the raw fd itself
    /// (`sent()` in the reference API).
    pub fn note_sent(&mut self, n: u64) {
        self.stats.sent += n;
    }
}

pub fn is_would_block_error(err: &Error) -> bool {
    match *err {
        Error::Io(ref e) => e.kind() == io::ErrorKind::WouldBlock,
        _ => false,
    }
}

const STAGING_BUF_LEN: usize = 16 * 1024;

/// Move up to `max` bytes from `input` to `output`.
///
/// Uses `splice(2)` for a zero-copy kernel-side transfer when the
/// `splice` feature is enabled and both descriptors are pipes; falls
/// back to a bounded staging-buffer copy otherwise (or if the syscall
/// reports `EINVAL`/`ENOSYS`, which happens when one end isn't a pipe).
#[cfg(all(feature = "splice", target_os = "linux"))]
pub fn splice(input: &mut InputBody, output: &mut OutputBody, max: usize) -> Result<usize, Error> {
    match splice_zero_copy(input, output, max) {
        Ok(n) => Ok(n),
        Err(Error::Io(ref e))
            if e.raw_os_error() == Some(::libc::EINVAL)
                || e.raw_os_error() == Some(::libc::ENOSYS) =>
        {
            splice_via_staging_buffer(input, output, max)
        }
        Err(e) => Err(e),
    }
}

/// Staging-buffer fallback used when the `splice` feature is off or the
/// platform has no `splice(2)`.
#[cfg(not(all(feature = "splice", target_os = "linux")))]
pub fn splice(input: &mut InputBody, output: &mut OutputBody, max: usize) -> Result<usize, Error> {
    splice_via_staging_buffer(input, output, max)
}

#[cfg(all(feature = "splice", target_os = "linux"))]
fn splice_zero_copy(input: &mut InputBody, output: &mut OutputBody, max: usize) -> Result<usize, Error> {
    if output.aborted {
        return Err(Error::Usage("output pipe stopped by peer"));
    }
    if let Some(a) = output.stats.announced {
        if output.stats.sent >= a {
            return Ok(0);
        }
    }
    let len = match output.stats.announced {
        Some(a) => ::std::cmp::min(max as u64, a - output.stats.sent) as usize,
        None => max,
    };
    let n = unsafe {
        ::libc::splice(
            input.fd.raw(),
            ::std::ptr::null_mut(),
            output.fd.raw(),
            ::std::ptr::null_mut(),
            len,
            ::libc::SPLICE_F_MOVE | ::libc::SPLICE_F_NONBLOCK,
        )
    };
    if n < 0 {
        let err = io::Error::last_os_error();
        if is_would_block(&err) {
            return Err(would_block());
        }
        return Err(Error::Io(err));
    }
    let n = n as u64;
    if n == 0 {
        input.stats.eof = true;
    } else {
        input.note_received(n);
        output.note_sent(n);
    }
    Ok(n as usize)
}

fn splice_via_staging_buffer(input: &mut InputBody, output: &mut OutputBody, max: usize) -> Result<usize, Error> {
    let mut buf = [0u8; STAGING_BUF_LEN];
    let want = ::std::cmp::min(max, buf.len());
    let n = input.try_read(&mut buf[..want])?;
    if n == 0 {
        return Ok(0);
    }
    let mut written = 0;
    while written < n {
        written += output.try_write(&buf[written..n])?;
    }
    Ok(n)
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::unistd;

    fn make_pipe() -> (Fd, Fd) {
        let (r, w) = unistd::pipe().unwrap();
        (Fd::new(r).unwrap(), Fd::new(w).unwrap())
    }

    #[test]
    fn input_stats_track_received_and_eof() {
        let (r, w) = make_pipe();
        let mut input = InputBody::new(r);
        input.set_announced(5);
        unistd::write(w.raw(), b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = input.try_read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(input.stats().received(), 5);
        assert!(input.stats().eof());
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn output_rejects_write_past_announced_length() {
        let (_r, w) = make_pipe();
        let mut output = OutputBody::new(w);
        output.set_announced(3);
        assert!(output.try_write(b"toolong").is_err());
    }

    #[test]
    fn output_length_mismatch_detected() {
        let (_r, w) = make_pipe();
        let mut output = OutputBody::new(w);
        output.set_announced(10);
        output.try_write(b"abc").unwrap();
        assert!(output.stats().length_mismatch());
    }

    #[test]
    fn staging_buffer_moves_bytes_from_input_to_output() {
        let (r1, w1) = make_pipe();
        let (r2, w2) = make_pipe();
        let mut input = InputBody::new(r1);
        let mut output = OutputBody::new(w2);
        unistd::write(w1.raw(), b"payload").unwrap();
        let n = splice_via_staging_buffer(&mut input, &mut output, 1024).unwrap();
        assert_eq!(n, 7);
        let mut buf = [0u8; 16];
        let got = unistd::read(r2.raw(), &mut buf).unwrap();
        assert_eq!(&buf[..got], b"payload");
    }
}
