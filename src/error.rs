use std::io;

quick_error! {
    /// Error taxonomy for the WAS protocol engine.
    ///
    /// I/O errors and protocol violations propagate to the caller by
    /// return value; the engine never panics in response to anything
    /// the peer sends.
    #[derive(Debug)]
    pub enum Error {
        /// A syscall on one of the three descriptors failed for a reason
        /// other than `EAGAIN`/`EINTR`.
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// A packet was malformed, illegal in the current protocol state,
        /// or its payload exceeded `Config::max_payload_len`.
        Protocol(msg: &'static str) {
            description("protocol error")
            display("protocol error: {}", msg)
        }
        /// The control channel was closed by the gateway before a
        /// `REQUEST` packet arrived.
        Eof {
            description("control channel closed")
        }
        /// An operation was called in an order the protocol forbids
        /// (e.g. `set_header` after the response has been committed).
        Usage(msg: &'static str) {
            description("usage error")
            display("usage error: {}", msg)
        }
        /// Declared output length did not match the number of bytes
        /// actually written before `end()`.
        LengthMismatch(declared: u64, actual: u64) {
            description("output length mismatch")
            display("declared output length {} but sent {} bytes",
                declared, actual)
        }
    }
}

impl Error {
    /// True for errors that should cause the engine to emit `ABORT`
    /// rather than `END` when they occur while finishing a request.
    pub fn is_fatal(&self) -> bool {
        match *self {
            Error::Io(..) | Error::Protocol(..) |
            Error::LengthMismatch(..) => true,
            Error::Eof | Error::Usage(..) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Error;
    use std::io;

    #[test]
    fn io_error_displays_cause() {
        let e = Error::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(format!("{}", e), "I/O error: boom");
        assert!(e.is_fatal());
    }

    #[test]
    fn usage_error_is_not_fatal() {
        let e = Error::Usage("set_header after commit");
        assert!(!e.is_fatal());
    }

    #[test]
    fn length_mismatch_is_fatal() {
        assert!(Error::LengthMismatch(10, 5).is_fatal());
    }
}
