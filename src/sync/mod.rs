//! Blocking driver on top of the sans-I/O protocol pieces.

mod channel;
mod conn;
mod local_infile;
mod stream;
mod transaction;

pub use channel::PacketChannel;
pub use conn::{Conn, PreparedStatement, ResultSet, StatementResult, StreamedResult};
pub use local_infile::{DirectoryInfileHandler, LocalInfileHandler};
pub use stream::Transport;

#[cfg(test)]
mod channel_test;
