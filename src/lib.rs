//! Client side of the MySQL wire protocol.
//!
//! The [`protocol`] module holds sans-I/O pieces: packet framing and
//! compression, the message payload buffer, command encoders, the result set
//! reader and the handshake state machine. [`value`] renders parameters and
//! decodes column values. [`sync`] drives all of it over a blocking stream.

pub mod buffer_pool;
pub mod charset;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod value;

pub use opts::{Opts, ResultSetConcurrency, StreamingPolicy};

#[cfg(test)]
mod constant_test;
#[cfg(test)]
mod opts_test;
