//! Buffered control socket: frames going out are queued and flushed,
//! frames coming in are assembled from whatever bytes the kernel hands
//! back and decoded one at a time (§4.2).
use std::os::unix::io::RawFd;

use netbuf::Buf;
use nix::poll::PollFlags;

use error::Error;
use fd::{Fd, is_would_block};
use packet::{self, Packet};
use poll;

/// Wraps the control descriptor with an input and an output `netbuf::Buf`,
/// the same buffering shape the reference implementation keeps per
/// connection direction.
pub struct Control {
    fd: Fd,
    input: Buf,
    output: Buf,
    max_payload_len: u32,
}

impl Control {
    pub fn new(fd: Fd, max_payload_len: u32) -> Control {
        Control {
            fd,
            input: Buf::new(),
            output: Buf::new(),
            max_payload_len,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.raw()
    }

    /// Pull more bytes from the socket into the input buffer.
    ///
    /// Non-blocking: returns `Ok(0)` on `WouldBlock` rather than waiting.
    /// Callers that want to wait should `poll::wait_readable` first, or
    /// use `next_packet(true)`.
    fn fill_once(&mut self) -> Result<usize, Error> {
        match self.input.read_from(&mut self.fd) {
            Ok(0) => Err(Error::Eof),
            Ok(n) => Ok(n),
            Err(ref e) if is_would_block(e) => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Decode and remove one packet from the front of the input buffer,
    /// reading more from the socket as needed.
    ///
    /// With `block = false`, returns `Ok(None)` as soon as the socket
    /// would block without a full frame available. With `block = true`,
    /// waits on `poll(2)` between read attempts until a full frame
    /// arrives.
    pub fn next_packet(&mut self, block: bool) -> Result<Option<Packet>, Error> {
        loop {
            if let Some((pkt, len)) = packet::decode(&self.input[..], self.max_payload_len)? {
                self.input.consume(len);
                return Ok(Some(pkt));
            }
            let got = self.fill_once()?;
            if got > 0 {
                continue;
            }
            if !block {
                return Ok(None);
            }
            poll::wait_readable(self.fd.raw(), -1).map_err(Error::Io)?;
        }
    }

    /// Queue a packet for the next `flush`.
    pub fn send(&mut self, pkt: &Packet) -> Result<(), Error> {
        let mut bytes = Vec::new();
        pkt.encode(&mut bytes);
        self.output.extend(&bytes);
        Ok(())
    }

    /// Write as much of the queued output as the socket accepts right
    /// now. With `block = true`, waits on `poll(2)` and retries until the
    /// output buffer is fully drained.
    pub fn flush(&mut self, block: bool) -> Result<(), Error> {
        while !self.output.is_empty() {
            match self.output.write_to(&mut self.fd) {
                Ok(_) => continue,
                Err(ref e) if is_would_block(e) => {
                    if !block {
                        return Ok(());
                    }
                    poll::wait_writable(self.fd.raw(), -1).map_err(Error::Io)?;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    pub fn poll_flags(&self) -> PollFlags {
        if self.has_pending_output() {
            PollFlags::POLLIN | PollFlags::POLLOUT
        } else {
            PollFlags::POLLIN
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use nix::unistd;

    fn make_pair() -> (Fd, Fd) {
        let (r, w) = unistd::pipe().unwrap();
        (Fd::new(r).unwrap(), Fd::new(w).unwrap())
    }

    #[test]
    fn send_and_flush_then_decode_on_the_other_end() {
        let (r1, w1) = make_pair();
        let (r2, w2) = make_pair();
        let mut writer = Control::new(w1, 65536);
        let mut reader = Control::new(r2, 65536);
        drop(r1);
        drop(w2);

        writer.send(&Packet::Status(200)).unwrap();
        writer.send(&Packet::End).unwrap();
        writer.flush(true).unwrap();

        assert_eq!(reader.next_packet(true).unwrap(), Some(Packet::Status(200)));
        assert_eq!(reader.next_packet(true).unwrap(), Some(Packet::End));
    }

    #[test]
    fn non_blocking_next_packet_returns_none_when_nothing_arrived() {
        let (r, w) = make_pair();
        let mut control = Control::new(r, 65536);
        assert_eq!(control.next_packet(false).unwrap(), None);
        drop(w);
    }

    #[test]
    fn fill_across_the_wire_from_another_thread() {
        let (r, w) = make_pair();
        let mut reader = Control::new(r, 65536);
        let handle = thread::spawn(move || {
            let mut writer = Control::new(w, 65536);
            writer.send(&Packet::Request).unwrap();
            writer.flush(true).unwrap();
        });
        assert_eq!(reader.next_packet(true).unwrap(), Some(Packet::Request));
        handle.join().unwrap();
    }
}
