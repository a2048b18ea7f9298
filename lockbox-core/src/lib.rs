//! # lockbox-core
//!
//! Length-prefixed framing for the Lockbox protocol.
//!
//! Every message on the wire is a 4-byte big-endian length followed by that
//! many payload bytes. This crate splits the concern in two:
//!
//! - [`FrameDecoder`] is pure: feed it bytes, pop whole frames. No I/O, instant tests.
//! - [`FramedTransport`] drives a decoder over any `AsyncRead + AsyncWrite`
//!   stream (a `TcpStream` in the server, a `DuplexStream` in tests).
//!
//! A transport is a per-connection resource and must only be driven by one
//! task at a time; `&mut self` on every operation enforces that.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod transport;

pub use error::{FrameError, TransportError};
pub use frame::{encode_header, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
pub use transport::FramedTransport;
