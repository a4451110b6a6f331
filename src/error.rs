use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::protocol::response::{ErrPayload, ErrPayloadBytes, ServerErrorKind};
use crate::value::SqlType;

/// Which part of the system an error invalidates.
///
/// `Connection` errors are fatal: the transport is closed and no further
/// command may be issued. `Command` errors end the current command but leave
/// the connection usable. `Value` errors are local to the single value being
/// encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Connection,
    Command,
    Value,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(ErrPayload),

    #[error("Password expired: {0}")]
    PasswordExpired(ErrPayload),

    #[error("Password must be changed before executing statements: {0}")]
    MustChangePassword(ErrPayload),

    #[error("Connection closed by server after interaction timeout: {0}")]
    ClientInteractionTimeout(ErrPayload),

    #[error("Data truncation: {0}")]
    DataTruncation(ErrPayload),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    #[error("Packets out of order, expected packet # {expected}, but received packet # {actual}{history}")]
    PacketSequence {
        expected: u8,
        actual: u8,
        history: String,
    },

    #[error("Packet for query is too large ({size} > {max}). You can change this value on the server by setting 'max_allowed_packet'")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Compressed packet error: {0}")]
    CompressionError(String),

    #[error(
        "Unable to connect to database, the server is possibly talking a different protocol (protocol version {0})"
    )]
    ProtocolMismatch(u8),

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("Too many authentication method switches or negotiation steps")]
    TooManyAuthNegotiations,

    #[error("Authentication plugin '{0}' requires a secure connection")]
    ConfidentialityRequired(String),

    #[error("Column metadata mismatch: cached definition has {expected} columns, server sent {actual}")]
    MetadataMismatch { expected: usize, actual: usize },

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Streaming result set is still active; it must be consumed or closed before any other command")]
    StreamingDataOutstanding,

    #[error("LOAD DATA LOCAL INFILE requested for '{0}' but local infile is disabled")]
    LocalInfileDisabled(String),

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Value '{value}' is outside of valid range for type {target}")]
    NumberOutOfRange { value: String, target: &'static str },

    #[error("Cannot convert {value_kind} to {target}")]
    TypeMismatch {
        value_kind: &'static str,
        target: SqlType,
    },

    #[error("Unsupported conversion from {from} to {to}")]
    DataConversion { from: String, to: &'static str },

    #[error("Bad usage error: {0}")]
    BadUsageError(String),

    #[error("Library bug: {0}")]
    LibraryBug(color_eyre::Report),
}

impl Error {
    pub fn scope(&self) -> ErrorScope {
        match self {
            Error::ServerError(_)
            | Error::DataTruncation(_)
            | Error::StreamingDataOutstanding
            | Error::LocalInfileDisabled(_)
            | Error::BadUsageError(_) => ErrorScope::Command,

            Error::DataFormat(_)
            | Error::NumberOutOfRange { .. }
            | Error::TypeMismatch { .. }
            | Error::DataConversion { .. } => ErrorScope::Value,

            Error::PasswordExpired(_)
            | Error::MustChangePassword(_)
            | Error::ClientInteractionTimeout(_)
            | Error::IoError(_)
            | Error::BadConfigError(_)
            | Error::InvalidPacket
            | Error::UnexpectedEof
            | Error::PacketSequence { .. }
            | Error::PacketTooLarge { .. }
            | Error::CompressionError(_)
            | Error::ProtocolMismatch(_)
            | Error::UnsupportedAuthPlugin(_)
            | Error::TooManyAuthNegotiations
            | Error::ConfidentialityRequired(_)
            | Error::MetadataMismatch { .. }
            | Error::ConnectionClosed
            | Error::LibraryBug(_) => ErrorScope::Connection,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Connection
    }

    /// SQL state reported by the server, if any
    pub fn sql_state(&self) -> Option<&str> {
        self.err_payload().map(|err| err.sql_state.as_str())
    }

    /// Numeric error code reported by the server, if any
    pub fn error_code(&self) -> Option<u16> {
        self.err_payload().map(|err| err.error_code)
    }

    fn err_payload(&self) -> Option<&ErrPayload> {
        match self {
            Error::ServerError(err)
            | Error::PasswordExpired(err)
            | Error::MustChangePassword(err)
            | Error::ClientInteractionTimeout(err)
            | Error::DataTruncation(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn data_format(message: impl Into<String>) -> Self {
        Error::DataFormat(message.into())
    }
}

impl From<ErrPayload> for Error {
    fn from(err: ErrPayload) -> Self {
        match err.kind() {
            ServerErrorKind::PasswordExpired => Error::PasswordExpired(err),
            ServerErrorKind::MustChangePassword => Error::MustChangePassword(err),
            ServerErrorKind::ClientInteractionTimeout => Error::ClientInteractionTimeout(err),
            ServerErrorKind::Truncation => Error::DataTruncation(err),
            ServerErrorKind::Other => Error::ServerError(err),
        }
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::from(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
