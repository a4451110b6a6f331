//! Result set state machine shared by COM_QUERY, COM_STMT_EXECUTE and COM_STMT_FETCH.
//!
//! The reader is fed one packet payload at a time and answers with the event
//! the packet produced. It never asks for more than the next packet, so a
//! streaming caller decides itself how far to read.

use crate::charset::Charset;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result, eyre};
use crate::opts::ResultSetConcurrency;
use crate::protocol::column::ColumnDefinition;
use crate::protocol::primitive::*;
use crate::protocol::response::{
    ErrPayloadBytes, OkPayload, is_end_of_rows, read_end_of_rows, read_eof_packet,
};
use crate::protocol::row::{Row, RowFactory, RowFormat};

/// Settings fixed for the lifetime of one reader
#[derive(Debug, Clone, Copy)]
pub struct ResultSetOptions {
    pub format: RowFormat,
    pub capabilities: CapabilityFlags,
    pub charset: Charset,
    pub concurrency: ResultSetConcurrency,
    pub large_row_size_threshold: usize,
}

impl ResultSetOptions {
    fn deprecate_eof(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    fn optional_metadata(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_OPTIONAL_RESULTSET_METADATA)
    }
}

/// What one packet meant
#[derive(Debug)]
pub enum ResultEvent {
    /// Packet consumed, nothing to report yet
    NeedPacket,
    /// Statement without a result set
    Ok(OkPayload),
    /// The server asks for the content of a client file (LOAD DATA LOCAL INFILE).
    /// The caller streams the file and keeps driving with the server's reply.
    LocalInfile(String),
    /// Column metadata is complete; rows follow
    ResultSetStart(ColumnDefinition),
    Row(Row),
    ResultSetEnd(OkPayload),
    /// COM_STMT_EXECUTE opened a server-side cursor; rows come from COM_STMT_FETCH
    CursorOpened(ColumnDefinition, ServerStatusFlags),
}

impl ResultEvent {
    /// Status flags reported by this event, if it ended a statement
    pub fn status_flags(&self) -> Option<ServerStatusFlags> {
        match self {
            Self::Ok(ok) | Self::ResultSetEnd(ok) => Some(ok.status_flags),
            Self::CursorOpened(_, status) => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum State {
    Header,
    Columns {
        remaining: usize,
        packets: Vec<Vec<u8>>,
    },
    MetadataEof {
        columns: ColumnDefinition,
    },
    Rows {
        factory: RowFactory,
        rows_seen: u64,
    },
    Finished,
}

/// Reads the responses of one command, including chained result sets
#[derive(Debug)]
pub struct ResultSetReader {
    options: ResultSetOptions,
    /// Prepare-time metadata used for skipped metadata and flag merging
    cached: Option<ColumnDefinition>,
    fetching: bool,
    state: State,
}

impl ResultSetReader {
    pub fn new(options: ResultSetOptions) -> Self {
        Self {
            options,
            cached: None,
            fetching: false,
            state: State::Header,
        }
    }

    /// Reader for a prepared statement whose columns were announced by COM_STMT_PREPARE
    pub fn with_cached_columns(options: ResultSetOptions, cached: ColumnDefinition) -> Self {
        Self {
            cached: Some(cached),
            ..Self::new(options)
        }
    }

    /// Reader for the rows of one COM_STMT_FETCH
    pub fn for_fetch(options: ResultSetOptions, columns: ColumnDefinition) -> Self {
        let factory = Self::row_factory(&options, columns);
        Self {
            options,
            cached: None,
            fetching: true,
            state: State::Rows {
                factory,
                rows_seen: 0,
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    /// Whether the reader is positioned inside the rows of a result set
    pub fn in_rows(&self) -> bool {
        matches!(self.state, State::Rows { .. })
    }

    /// Columns of the result set being read
    pub fn columns(&self) -> Option<&ColumnDefinition> {
        match &self.state {
            State::MetadataEof { columns } => Some(columns),
            State::Rows { factory, .. } => Some(factory.columns()),
            _ => None,
        }
    }

    fn row_factory(options: &ResultSetOptions, columns: ColumnDefinition) -> RowFactory {
        RowFactory::new(
            options.format,
            columns,
            options.concurrency,
            options.large_row_size_threshold,
        )
    }

    /// Feed the next packet payload
    pub fn drive(&mut self, payload: &[u8]) -> Result<ResultEvent> {
        if payload.first() == Some(&0xFF) {
            self.state = State::Finished;
            return Err(ErrPayloadBytes(payload).into());
        }
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Header => self.on_header(payload),
            State::Columns {
                remaining,
                mut packets,
            } => {
                packets.push(payload.to_vec());
                if remaining > 1 {
                    self.state = State::Columns {
                        remaining: remaining - 1,
                        packets,
                    };
                    return Ok(ResultEvent::NeedPacket);
                }
                let mut columns = ColumnDefinition::parse(&packets, self.options.charset)?;
                if let Some(cached) = &self.cached {
                    columns.merge_flags_from(cached)?;
                }
                self.columns_complete(columns)
            }
            State::MetadataEof { columns } => {
                let eof = read_eof_packet(payload)?;
                let status = eof.status_flags();
                if status.contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS) {
                    return Ok(ResultEvent::CursorOpened(columns, status));
                }
                self.start_rows(columns)
            }
            State::Rows { factory, rows_seen } => {
                if is_end_of_rows(payload) {
                    let ok = read_end_of_rows(payload, self.options.capabilities)?;
                    if !self.fetching
                        && rows_seen == 0
                        && ok
                            .status_flags
                            .contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
                    {
                        return Ok(ResultEvent::CursorOpened(
                            factory.columns().clone(),
                            ok.status_flags,
                        ));
                    }
                    self.after_statement(&ok);
                    return Ok(ResultEvent::ResultSetEnd(ok));
                }
                let row = factory.create(payload)?;
                self.state = State::Rows {
                    factory,
                    rows_seen: rows_seen + 1,
                };
                Ok(ResultEvent::Row(row))
            }
            State::Finished => Err(Error::LibraryBug(eyre!(
                "result set reader driven after the last result"
            ))),
        }
    }

    fn on_header(&mut self, payload: &[u8]) -> Result<ResultEvent> {
        match payload.first() {
            None => Err(Error::InvalidPacket),
            Some(0x00) => {
                let ok = OkPayload::parse(payload, self.options.capabilities)?;
                self.after_statement(&ok);
                Ok(ResultEvent::Ok(ok))
            }
            Some(0xFB) => {
                let file_name = String::from_utf8_lossy(read_string_eof(&payload[1..]));
                // the server answers the file content with OK or ERR
                self.state = State::Header;
                Ok(ResultEvent::LocalInfile(file_name.into_owned()))
            }
            Some(_) => {
                let (column_count, rest) = read_int_lenenc(payload)?;
                let column_count = usize::try_from(column_count).map_err(|_| Error::InvalidPacket)?;
                let metadata_follows = if self.options.optional_metadata() {
                    let (flag, _) = read_int_1(rest)?;
                    flag != 0
                } else {
                    true
                };
                if metadata_follows {
                    self.state = State::Columns {
                        remaining: column_count,
                        packets: Vec::with_capacity(column_count),
                    };
                    return Ok(ResultEvent::NeedPacket);
                }
                let columns = match &self.cached {
                    Some(cached) if cached.len() == column_count => cached.clone(),
                    Some(cached) => {
                        return Err(Error::MetadataMismatch {
                            expected: cached.len(),
                            actual: column_count,
                        });
                    }
                    None => {
                        return Err(Error::LibraryBug(eyre!(
                            "server skipped metadata for a result without cached columns"
                        )));
                    }
                };
                self.columns_complete(columns)
            }
        }
    }

    fn columns_complete(&mut self, columns: ColumnDefinition) -> Result<ResultEvent> {
        if self.options.deprecate_eof() {
            self.start_rows(columns)
        } else {
            self.state = State::MetadataEof { columns };
            Ok(ResultEvent::NeedPacket)
        }
    }

    fn start_rows(&mut self, columns: ColumnDefinition) -> Result<ResultEvent> {
        tracing::trace!(columns = columns.len(), "result set started");
        self.state = State::Rows {
            factory: Self::row_factory(&self.options, columns.clone()),
            rows_seen: 0,
        };
        Ok(ResultEvent::ResultSetStart(columns))
    }

    fn after_statement(&mut self, ok: &OkPayload) {
        self.state = if !self.fetching
            && ok
                .status_flags
                .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
        {
            State::Header
        } else {
            State::Finished
        };
    }
}
