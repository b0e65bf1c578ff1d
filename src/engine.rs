//! The protocol engine: owns the three descriptors and drives the state
//! machine `IDLE -> HEADERS -> BODY_IN -> RESPONSE -> BODY_OUT -> END_SENT
//! -> IDLE`, with an `ABORTED` branch reachable from anywhere (§4.3).
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::poll::PollFlags;

use body::{self, InputBody, InputStats, OutputBody, OutputStats};
use config::Config;
use control::Control;
use error::Error;
use fd::Fd;
use headers;
use iter::PairIter;
use packet::{Method, Packet};
use poll;
use request::RequestState;

/// Outcome of a blocking or non-blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The awaited condition was satisfied: a request arrived, a pipe
    /// became ready, or pending control packets were serviced.
    Ready,
    /// The requested timeout elapsed with nothing to report.
    Timeout,
    /// The peer ended the session before a new request arrived; the
    /// host should exit.
    Terminate,
    /// `output_poll` only: the peer sent `STOP`, the output pipe no
    /// longer accepts writes.
    Closed,
    /// `input_poll` only: the peer sent `PREMATURE`, the request body
    /// ended before its announced length was received.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Headers,
    BodyIn,
    Response,
    BodyOut,
    EndSent,
    Aborted,
}

/// Drives one WAS worker's request/response cycle over its three
/// descriptors. One instance handles one request at a time; see the
/// crate-level docs for the threading caveat.
pub struct Engine {
    config: Arc<Config>,
    control: Control,
    input: InputBody,
    output: OutputBody,
    request: RequestState,
    state: State,
    headers_committed: bool,
    pending_status: Option<u16>,
    pending_length: Option<u64>,
}

impl Engine {
    /// Open the conventional descriptor triple (control=3, input=0,
    /// output=1), the default a WAS worker is spawned with.
    pub fn new() -> Result<Engine, Error> {
        Engine::with_config(Config::new().done())
    }

    /// Open an explicit descriptor triple.
    pub fn new_fds(control: i32, input: i32, output: i32) -> Result<Engine, Error> {
        let config = Config::new().fds(control, input, output).done();
        Engine::with_config(config)
    }

    pub fn with_config(config: Arc<Config>) -> Result<Engine, Error> {
        let control_fd = Fd::new(config.control_fd())?;
        let input_fd = Fd::new(config.input_fd())?;
        let output_fd = Fd::new(config.output_fd())?;
        Ok(Engine {
            control: Control::new(control_fd, config.max_payload_len_value()),
            input: InputBody::new(input_fd),
            output: OutputBody::new(output_fd),
            request: RequestState::new(),
            state: State::Idle,
            headers_committed: false,
            pending_status: None,
            pending_length: None,
            config,
        })
    }

    pub fn config(&self) -> &Arc<Config> { &self.config }

    pub fn control_fd(&self) -> RawFd { self.control.raw_fd() }

    // ---- lifecycle -----------------------------------------------

    /// Block until the next request's `REQUEST` packet arrives, or the
    /// peer ends the session (§4.3.1).
    pub fn accept(&mut self) -> Result<PollResult, Error> {
        self.accept_impl(true)
    }

    /// Non-blocking variant: `Timeout` means no packet is buffered yet.
    pub fn accept_non_block(&mut self) -> Result<PollResult, Error> {
        self.accept_impl(false)
    }

    fn accept_impl(&mut self, block: bool) -> Result<PollResult, Error> {
        if self.state != State::Headers {
            self.finish_prior_request()?;
            self.request.reset();
            self.input.reset();
            self.output.reset();
            self.headers_committed = false;
            self.pending_status = None;
            self.pending_length = None;
            self.state = State::Headers;
        }
        loop {
            let pkt = match self.control.next_packet(block) {
                Ok(Some(p)) => p,
                Ok(None) => return Ok(PollResult::Timeout),
                Err(Error::Eof) => {
                    debug!("control channel closed before REQUEST");
                    self.state = State::Idle;
                    return Ok(PollResult::Terminate);
                }
                Err(e) => {
                    let _ = self.abort();
                    return Err(e);
                }
            };
            trace!("header-phase packet: {:?}", pkt);
            match pkt {
                Packet::Nop => {}
                Packet::Method(m) => self.request.set_method(m),
                Packet::Uri(v) => self.request.set_uri(v),
                Packet::ScriptName(v) => self.request.set_script_name(v),
                Packet::PathInfo(v) => self.request.set_path_info(v),
                Packet::QueryString(v) => self.request.set_query_string(v),
                Packet::Header(n, v) => self.request.add_header(n, v),
                Packet::Parameter(n, v) => self.request.add_parameter(n, v),
                Packet::RemoteHost(v) => self.request.set_remote_host(v),
                Packet::Length(n) => {
                    self.request.set_content_length(n);
                    self.input.set_announced(n);
                }
                Packet::Data => {}
                Packet::Metric(..) => self.request.set_want_metrics(),
                Packet::NoData => self.input.mark_no_body(),
                Packet::Premature => self.input.mark_premature(),
                Packet::Request => {
                    self.state = State::BodyIn;
                    debug!(
                        "accepted {} {}",
                        self.request.method().as_str(),
                        String::from_utf8_lossy(self.request.uri())
                    );
                    return Ok(PollResult::Ready);
                }
                Packet::Stop | Packet::Abort => {
                    debug!("peer ended session before REQUEST");
                    self.state = State::Idle;
                    return Ok(PollResult::Terminate);
                }
                Packet::Status(_) | Packet::End => {
                    let _ = self.abort();
                    return Err(Error::Protocol("unexpected packet during header phase"));
                }
            }
        }
    }

    fn finish_prior_request(&mut self) -> Result<(), Error> {
        if matches!(self.state, State::Idle | State::EndSent | State::Aborted) {
            self.state = State::Idle;
            return Ok(());
        }
        debug!("accept() called with a request still in flight; finishing it");
        self.drain_undrained_input();
        let result = if self.headers_committed && self.output.stats().length_mismatch() {
            self.abort()
        } else {
            self.end()
        };
        self.state = State::Idle;
        result
    }

    fn drain_undrained_input(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.input.try_read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    // ---- request introspection -------------------------------------

    pub fn method(&self) -> Method { self.request.method() }
    pub fn uri(&self) -> &[u8] { self.request.uri() }
    pub fn script_name(&self) -> &[u8] { self.request.script_name() }
    pub fn path_info(&self) -> &[u8] { self.request.path_info() }
    pub fn query_string(&self) -> &[u8] { self.request.query_string() }
    pub fn remote_host(&self) -> &[u8] { self.request.remote_host() }

    pub fn header(&self, name: &[u8]) -> Option<&[u8]> { self.request.header(name) }
    pub fn multi_header<'a>(&'a self, name: &[u8]) -> PairIter<'a> {
        self.request.multi_header(name)
    }
    pub fn header_iter<'a>(&'a self) -> PairIter<'a> { self.request.header_iter() }
    pub fn parameter(&self, name: &[u8]) -> Option<&[u8]> { self.request.parameter(name) }
    pub fn parameter_iter<'a>(&'a self) -> PairIter<'a> { self.request.parameter_iter() }

    // ---- request body ------------------------------------------------

    pub fn has_body(&self) -> bool { self.input.has_body() }
    pub fn input_fd(&self) -> RawFd { self.input.raw_fd() }
    pub fn input_remaining(&self) -> i64 { self.input.remaining() }
    pub fn input_stats(&self) -> InputStats { self.input.stats() }

    /// Record bytes the application consumed by reading `input_fd()`
    /// directly instead of through `read`.
    pub fn received(&mut self, n: u64) { self.input.note_received(n); }

    /// Service the control channel, then wait for the input pipe (or a
    /// new control packet) to become ready (§4.3.5).
    pub fn input_poll(&mut self, timeout_ms: i32) -> Result<PollResult, Error> {
        self.service_control_async()?;
        if self.input.stats().eof() {
            return Ok(self.input_ready_result());
        }
        let watch = [
            (self.input.raw_fd(), PollFlags::POLLIN),
            (self.control.raw_fd(), self.control.poll_flags()),
        ];
        match poll::wait_any(&watch, timeout_ms).map_err(Error::Io)? {
            poll::Ready::Timeout => {
                warn!("input_poll timed out after {}ms", timeout_ms);
                Ok(PollResult::Timeout)
            }
            poll::Ready::Some => {
                self.service_control_async()?;
                Ok(self.input_ready_result())
            }
        }
    }

    /// `Ready`, unless the body ended via `PREMATURE`, in which case
    /// `End` (§7.3).
    fn input_ready_result(&self) -> PollResult {
        if self.input.stats().eof() && self.input.stats().premature() {
            PollResult::End
        } else {
            PollResult::Ready
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            match self.input.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e) if body::is_would_block_error(e) => {
                    self.input_poll(-1)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Tell the peer we're done with the request body before it was
    /// fully drained, then discard whatever still arrives (§4.5).
    pub fn input_close(&mut self) -> Result<(), Error> {
        if self.input.stats().eof() {
            return Ok(());
        }
        debug!("closing input body early, sending STOP");
        self.control.send(&Packet::Stop)?;
        self.control.flush(true)?;
        self.input.begin_close();
        loop {
            if self.input.stats().eof() {
                break;
            }
            let mut buf = [0u8; 4096];
            match self.input.try_read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if body::is_would_block_error(e) => {
                    self.input_poll(-1)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ---- response ------------------------------------------------

    fn ensure_headers_open(&mut self) -> Result<(), Error> {
        match self.state {
            State::BodyIn => {
                self.state = State::Response;
                Ok(())
            }
            State::Response => Ok(()),
            State::Aborted => Err(Error::Usage("request was aborted")),
            _ => Err(Error::Usage("not in a phase where response headers can be set")),
        }
    }

    pub fn status(&mut self, code: u16) -> Result<(), Error> {
        self.ensure_headers_open()?;
        if self.headers_committed {
            return Err(Error::Usage("status set after headers were committed"));
        }
        self.pending_status = Some(code);
        Ok(())
    }

    pub fn set_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), Error> {
        self.ensure_headers_open()?;
        if self.headers_committed {
            return Err(Error::Usage("set_header after headers were committed"));
        }
        let name_str = String::from_utf8_lossy(name);
        if headers::is_forbidden_response_header(&name_str) {
            return Err(Error::Usage("forbidden response header"));
        }
        self.control.send(&Packet::Header(name.to_vec(), value.to_vec()))?;
        self.control.flush(false)?;
        Ok(())
    }

    /// Parity with the reference API's explicit-length setter; Rust
    /// slices already carry their length, so this is `set_header`.
    pub fn set_header_n(&mut self, name: &[u8], value: &[u8]) -> Result<(), Error> {
        self.set_header(name, value)
    }

    /// Forward every request header not in the forbidden set.
    pub fn copy_all_headers(&mut self) -> Result<(), Error> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = self.request.headers().iter().cloned().collect();
        for (name, value) in pairs {
            let name_str = String::from_utf8_lossy(&name);
            if headers::is_forbidden_response_header(&name_str) {
                continue;
            }
            self.set_header(&name, &value)?;
        }
        Ok(())
    }

    pub fn set_length(&mut self, n: u64) -> Result<(), Error> {
        self.ensure_headers_open()?;
        if self.headers_committed {
            return Err(Error::Usage("set_length after headers were committed"));
        }
        self.pending_length = Some(n);
        self.output.set_announced(n);
        Ok(())
    }

    /// Commit status and headers: emits `STATUS` (default 200), then
    /// `LENGTH` if `set_length` was called, then `DATA`, after which the
    /// output pipe carries raw body bytes (§4.3.3).
    pub fn output_begin(&mut self) -> Result<(), Error> {
        self.ensure_headers_open()?;
        if self.headers_committed {
            return Ok(());
        }
        let code = self.pending_status.take().unwrap_or(200);
        self.control.send(&Packet::Status(code))?;
        if let Some(n) = self.pending_length.take() {
            self.control.send(&Packet::Length(n))?;
        }
        self.control.send(&Packet::Data)?;
        self.control.flush(true)?;
        self.headers_committed = true;
        self.output.mark_began();
        self.state = State::BodyOut;
        Ok(())
    }

    fn ensure_output_committed(&mut self) -> Result<(), Error> {
        if !self.headers_committed {
            self.output_begin()?;
        }
        Ok(())
    }

    pub fn output_fd(&self) -> RawFd { self.output.raw_fd() }
    pub fn output_stats(&self) -> OutputStats { self.output.stats() }

    /// Record bytes the application sent by writing `output_fd()`
    /// directly instead of through `write`.
    pub fn sent(&mut self, n: u64) { self.output.note_sent(n); }

    /// Service the control channel, then wait for the output pipe (or a
    /// new control packet) to become ready (§4.3.5).
    pub fn output_poll(&mut self, timeout_ms: i32) -> Result<PollResult, Error> {
        self.service_control_async()?;
        if self.output.is_aborted() {
            return Ok(PollResult::Closed);
        }
        let watch = [
            (self.output.raw_fd(), PollFlags::POLLOUT),
            (self.control.raw_fd(), self.control.poll_flags()),
        ];
        match poll::wait_any(&watch, timeout_ms).map_err(Error::Io)? {
            poll::Ready::Timeout => {
                warn!("output_poll timed out after {}ms", timeout_ms);
                Ok(PollResult::Timeout)
            }
            poll::Ready::Some => {
                self.service_control_async()?;
                if self.output.is_aborted() {
                    Ok(PollResult::Closed)
                } else {
                    Ok(PollResult::Ready)
                }
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.ensure_output_committed()?;
        let mut written = 0;
        while written < buf.len() {
            match self.output.try_write(&buf[written..]) {
                Ok(n) => written += n,
                Err(ref e) if body::is_would_block_error(e) => {
                    self.output_poll(-1)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn puts(&mut self, s: &str) -> Result<(), Error> {
        self.write(s.as_bytes())?;
        self.write(b"\n")
    }

    /// Formatted write, the idiomatic stand-in for the reference API's
    /// variadic `printf`.
    pub fn printf(&mut self, args: fmt::Arguments) -> Result<(), Error> {
        use std::fmt::Write as FmtWrite;
        let mut rendered = String::new();
        rendered
            .write_fmt(args)
            .map_err(|_| Error::Usage("formatting error"))?;
        self.write(rendered.as_bytes())
    }

    /// Move up to `max` bytes from the request body straight to the
    /// response body (§4.5).
    pub fn splice(&mut self, max: usize) -> Result<usize, Error> {
        self.ensure_output_committed()?;
        loop {
            match body::splice(&mut self.input, &mut self.output, max) {
                Ok(n) => return Ok(n),
                Err(ref e) if body::is_would_block_error(e) => {
                    let watch = [
                        (self.input.raw_fd(), PollFlags::POLLIN),
                        (self.output.raw_fd(), PollFlags::POLLOUT),
                        (self.control.raw_fd(), self.control.poll_flags()),
                    ];
                    poll::wait_any(&watch, -1).map_err(Error::Io)?;
                    self.service_control_async()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Splice the whole remaining request body to the response, and if
    /// `end` is set, declare the output length up front and call `end`
    /// once it's all transferred.
    pub fn splice_all(&mut self, end: bool) -> Result<u64, Error> {
        if end {
            if let Some(announced) = self.input.stats().announced() {
                let remaining = announced.saturating_sub(self.input.stats().received());
                self.set_length(remaining)?;
            }
        }
        let mut total = 0u64;
        loop {
            let n = self.splice(64 * 1024)?;
            if n == 0 {
                break;
            }
            total += n as u64;
        }
        if end {
            self.end()?;
        }
        Ok(total)
    }

    // ---- termination ------------------------------------------------

    /// Finish the request: flush body accounting, send `END`. If an
    /// announced output length doesn't match what was sent, sends
    /// `ABORT` instead (§4.3.4).
    pub fn end(&mut self) -> Result<(), Error> {
        if self.state == State::Aborted {
            return Ok(());
        }
        if !self.headers_committed {
            let code = self.pending_status.take().unwrap_or(204);
            self.control.send(&Packet::Status(code))?;
            self.control.send(&Packet::NoData)?;
            self.output.mark_no_body();
            self.headers_committed = true;
        }
        if self.output.stats().length_mismatch() {
            error!(
                "output length mismatch: declared {:?}, sent {}",
                self.output.stats().announced(),
                self.output.stats().sent()
            );
            return self.abort();
        }
        self.control.send(&Packet::End)?;
        self.control.flush(true)?;
        self.state = State::EndSent;
        Ok(())
    }

    pub fn abort(&mut self) -> Result<(), Error> {
        if self.state != State::Aborted {
            let _ = self.control.send(&Packet::Abort);
            let _ = self.control.flush(true);
            self.state = State::Aborted;
        }
        Ok(())
    }

    // ---- metrics ------------------------------------------------

    pub fn want_metrics(&self) -> bool { self.request.want_metrics() }

    /// Send a metric value on the control channel. Rejected as a usage
    /// error if no request has been accepted yet (§9 Open Question (c)).
    pub fn metric(&mut self, name: &[u8], value: f32) -> Result<(), Error> {
        if matches!(self.state, State::Idle | State::Headers) {
            return Err(Error::Usage("metric called before accept returned"));
        }
        if matches!(self.state, State::EndSent | State::Aborted) {
            return Err(Error::Usage("metric called after end/abort"));
        }
        debug!("sending metric {}", String::from_utf8_lossy(name));
        self.control.send(&Packet::metric_response(name, value))?;
        self.control.flush(false)?;
        Ok(())
    }

    // ---- asynchronous control servicing ------------------------------

    fn service_control_async(&mut self) -> Result<(), Error> {
        loop {
            let pkt = match self.control.next_packet(false) {
                Ok(Some(p)) => p,
                Ok(None) => return Ok(()),
                Err(Error::Eof) => {
                    let _ = self.abort();
                    return Err(Error::Protocol("control channel closed mid-request"));
                }
                Err(e) => {
                    let _ = self.abort();
                    return Err(e);
                }
            };
            trace!("async control packet: {:?}", pkt);
            match pkt {
                Packet::Nop => {}
                Packet::Stop => {
                    debug!("peer sent STOP, output pipe aborted");
                    self.output.mark_aborted();
                }
                Packet::Premature => {
                    debug!("peer sent PREMATURE, input body closed early");
                    self.input.mark_premature();
                }
                Packet::Metric(..) => self.request.set_want_metrics(),
                Packet::Abort => {
                    self.state = State::Aborted;
                    return Err(Error::Protocol("peer aborted the request"));
                }
                _ => {
                    let _ = self.abort();
                    return Err(Error::Protocol("unexpected packet during body phase"));
                }
            }
        }
    }
}
