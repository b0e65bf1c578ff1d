//! Test harness: wires an `Engine` up to a fake WAS gateway sitting on
//! the opposite end of a real control socketpair and two real pipes, so
//! integration tests can drive the protocol exactly as a real gateway
//! process would.
extern crate nix;
extern crate was_simple;

use std::os::unix::io::RawFd;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd;

use was_simple::{Config, Engine, Packet};

pub struct Gateway {
    pub control: RawFd,
    pub input_write: RawFd,
    pub output_read: RawFd,
}

impl Gateway {
    pub fn send(&self, pkt: &Packet) {
        let mut buf = Vec::new();
        pkt.encode(&mut buf);
        unistd::write(self.control, &buf).expect("gateway send on control socket");
    }

    pub fn send_raw(&self, bytes: &[u8]) {
        unistd::write(self.control, bytes).expect("gateway raw send on control socket");
    }

    pub fn recv_raw(&self, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let n = unistd::read(self.control, &mut buf).expect("gateway recv on control socket");
        buf.truncate(n);
        buf
    }

    pub fn write_body(&self, bytes: &[u8]) {
        unistd::write(self.input_write, bytes).expect("gateway write request body");
    }

    pub fn close_input(&self) {
        let _ = unistd::close(self.input_write);
    }

    pub fn read_response_body(&self, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let n = unistd::read(self.output_read, &mut buf).expect("gateway read response body");
        buf.truncate(n);
        buf
    }
}

pub fn harness() -> (Engine, Gateway) {
    let (gw_control, engine_control) =
        socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())
            .expect("control socketpair");
    let (engine_input, gw_input_write) = unistd::pipe().expect("input pipe");
    let (gw_output_read, engine_output) = unistd::pipe().expect("output pipe");

    let config = Config::new()
        .fds(engine_control, engine_input, engine_output)
        .done();
    let engine = Engine::with_config(config).expect("engine construction");

    let gateway = Gateway {
        control: gw_control,
        input_write: gw_input_write,
        output_read: gw_output_read,
    };
    (engine, gateway)
}
