//! Synchronous server-side implementation of the Web Application Socket
//! (WAS) protocol.
//!
//! A WAS worker handles one request at a time over three preopened file
//! descriptors: a bidirectional control socket carrying framed metadata
//! packets, a pipe carrying the request body, and a pipe carrying the
//! response body. This crate implements the protocol engine that drives
//! those three descriptors — decoding control packets into request state,
//! multiplexing body transfer with asynchronously arriving control
//! commands, and enforcing the header/body ordering invariants of the
//! wire protocol.
//!
//! Process spawning, request dispatch, form parsing and transport
//! security are not this crate's job; see [`Engine`] for the surface it
//! does own.
#![recursion_limit="100"]

extern crate libc;
extern crate nix;
extern crate netbuf;
extern crate byteorder;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod packet;
mod error;
mod config;
mod fd;
mod poll;
mod headers;
mod request;
mod control;
mod body;
mod iter;
mod engine;

pub use error::Error;
pub use config::Config;
pub use packet::{Kind, Packet, Method};
pub use request::RequestState;
pub use iter::PairIter;
pub use body::{InputStats, OutputStats};
pub use engine::{Engine, PollResult};
