//! Sans-I/O protocol pieces: framing, payload codecs, result reading and
//! the handshake state machine. Nothing here touches a socket.

pub mod column;
pub mod command;
pub mod compress;
pub mod connection;
pub mod packet;
pub mod payload;
pub mod pipeline;
pub mod primitive;
pub mod response;
pub mod row;

pub use column::{ColumnDefinition, Field, LazyString};
pub use row::{Row, RowFactory, RowFormat};

#[cfg(test)]
mod packet_test;
