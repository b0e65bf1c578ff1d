use std::sync::Arc;

/// Conventional file descriptor numbers used when a WAS worker is
/// spawned by a gateway: control socket on 3, request body on stdin,
/// response body on stdout.
pub const DEFAULT_CONTROL_FD: i32 = 3;
pub const DEFAULT_INPUT_FD: i32 = 0;
pub const DEFAULT_OUTPUT_FD: i32 = 1;

/// Hard limit on a single control packet's payload, matching the
/// 64 KiB recommended by the protocol.
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 65536;

/// Fine-grained configuration of the WAS protocol engine.
#[derive(Debug, Clone)]
pub struct Config {
    control_fd: i32,
    input_fd: i32,
    output_fd: i32,
    max_payload_len: u32,
    default_poll_timeout_ms: i32,
}

impl Config {
    /// Create a config with the conventional descriptor triple and
    /// defaults (`was_simple_new()` in the reference implementation).
    pub fn new() -> Config {
        Config {
            control_fd: DEFAULT_CONTROL_FD,
            input_fd: DEFAULT_INPUT_FD,
            output_fd: DEFAULT_OUTPUT_FD,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            default_poll_timeout_ms: -1,
        }
    }

    /// Override the descriptor triple (`was_simple_new_fds()` in the
    /// reference implementation).
    pub fn fds(&mut self, control: i32, input: i32, output: i32) -> &mut Self {
        self.control_fd = control;
        self.input_fd = input;
        self.output_fd = output;
        self
    }

    /// Cap on a single control packet's payload length (§4.1).
    pub fn max_payload_len(&mut self, value: u32) -> &mut Self {
        self.max_payload_len = value;
        self
    }

    /// Timeout, in milliseconds, used by blocking operations that don't
    /// take an explicit timeout (`-1` is infinite, the default).
    pub fn default_poll_timeout_ms(&mut self, value: i32) -> &mut Self {
        self.default_poll_timeout_ms = value;
        self
    }

    /// Freeze the config for use by `Engine::new`.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }

    pub fn control_fd(&self) -> i32 { self.control_fd }
    pub fn input_fd(&self) -> i32 { self.input_fd }
    pub fn output_fd(&self) -> i32 { self.output_fd }
    pub fn max_payload_len_value(&self) -> u32 { self.max_payload_len }
    pub fn default_timeout(&self) -> i32 { self.default_poll_timeout_ms }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
