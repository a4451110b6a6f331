use std::io::Read;
use std::net::TcpStream;
use std::ops::{Deref, DerefMut};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use super::channel::PacketChannel;
use super::local_infile::LocalInfileHandler;
use super::stream::Transport;
use crate::constant::{CapabilityFlags, CursorType, ServerStatusFlags};
use crate::error::{Error, Result, eyre};
use crate::opts::{Opts, StreamingPolicy};
use crate::protocol::column::ColumnDefinition;
use crate::protocol::command::prepared::{
    read_prepare_ok, write_close_statement, write_execute, write_fetch, write_prepare,
    write_reset_statement, write_send_long_data,
};
use crate::protocol::command::query::{write_query, write_query_with_attributes};
use crate::protocol::command::utility::{
    SetOption, write_init_db, write_ping, write_quit, write_reset_connection, write_set_option,
};
use crate::protocol::command::{ResultEvent, ResultSetOptions, ResultSetReader};
use crate::protocol::connection::{
    AuthPluginRegistry, Handshake, HandshakeAction, HandshakeConfig,
};
use crate::protocol::pipeline::{DebugHistory, PipelineHandle, Stage, TimingStats};
use crate::protocol::response::{OkPayload, read_eof_packet, read_ok_or_err};
use crate::protocol::row::{Row, RowFormat};
use crate::session::ServerSession;
use crate::value::encode::check_stream_target;
use crate::value::{BindSource, BindValue, EncodeContext, EncoderRegistry};

/// Largest LOCAL INFILE chunk sent in one packet
const LOCAL_INFILE_CHUNK: usize = 64 * 1024;

/// Largest COM_STMT_SEND_LONG_DATA chunk
const LONG_DATA_CHUNK: usize = 1024 * 1024;

/// Command byte, statement id and parameter index
const LONG_DATA_HEADER: usize = 7;

/// Rows of one result set together with the packet that closed it
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: ColumnDefinition,
    pub rows: Vec<Row>,
    pub end: OkPayload,
}

/// Outcome of one statement of a command
#[derive(Debug, Clone)]
pub enum StatementResult {
    Update(OkPayload),
    Rows(ResultSet),
}

impl StatementResult {
    pub fn rows(&self) -> &[Row] {
        match self {
            Self::Rows(set) => &set.rows,
            Self::Update(_) => &[],
        }
    }

    pub fn affected_rows(&self) -> u64 {
        match self {
            Self::Update(ok) => ok.affected_rows,
            Self::Rows(_) => 0,
        }
    }
}

/// First thing a streamed command produced
#[derive(Debug, Clone)]
pub enum StreamedResult {
    Update(OkPayload),
    /// Rows follow; read them with [`Conn::next_row`]
    Rows(ColumnDefinition),
}

/// Server-side statement created by [`Conn::prepare`]
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    id: u32,
    param_count: u16,
    params: Option<ColumnDefinition>,
    columns: Option<ColumnDefinition>,
}

impl PreparedStatement {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn param_count(&self) -> u16 {
        self.param_count
    }

    pub fn params(&self) -> Option<&ColumnDefinition> {
        self.params.as_ref()
    }

    /// Result columns announced at prepare time
    pub fn columns(&self) -> Option<&ColumnDefinition> {
        self.columns.as_ref()
    }
}

/// A blocking MySQL connection.
///
/// One command runs at a time. A fatal error closes the transport, after
/// which every call fails with [`Error::ConnectionClosed`].
pub struct Conn<S: Transport> {
    channel: PacketChannel<S>,
    opts: Opts,
    session: ServerSession,
    registry: Arc<AuthPluginRegistry>,
    encoders: EncoderRegistry,
    session_zone: FixedOffset,
    /// Scramble of the greeting, reused by COM_CHANGE_USER
    seed: Vec<u8>,
    auth_plugin: Option<&'static str>,
    secure: bool,
    streaming: Option<ResultSetReader>,
    local_infile: Option<Box<dyn LocalInfileHandler>>,
    write_buffer: Vec<u8>,
    closed: bool,
}

impl<S: Transport> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("session", &self.session)
            .field("auth_plugin", &self.auth_plugin)
            .field("secure", &self.secure)
            .field("streaming", &self.streaming.is_some())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Conn<TcpStream> {
    /// Connect over TCP to `opts.host:opts.port`
    #[tracing::instrument(skip_all)]
    pub fn connect(opts: Opts) -> Result<Self> {
        let host = opts.host.as_deref().unwrap_or("localhost");
        let stream = TcpStream::connect((host, opts.port))?;
        stream.set_nodelay(opts.tcp_nodelay)?;
        Self::with_transport(stream, opts)
    }
}

impl Conn<UnixStream> {
    /// Connect over the Unix socket at `opts.socket`
    #[tracing::instrument(skip_all)]
    pub fn connect_socket(opts: Opts) -> Result<Self> {
        let path = opts
            .socket
            .as_deref()
            .ok_or_else(|| Error::BadConfigError("no socket path configured".to_string()))?;
        let stream = UnixStream::connect(path)?;
        Self::with_transport(stream, opts)
    }
}

fn pipeline_for(opts: &Opts) -> PipelineHandle {
    let mut stages = Vec::new();
    if opts.trace_protocol {
        stages.push(Stage::Trace);
    }
    if opts.collect_timing {
        stages.push(Stage::Timing(Arc::default()));
    }
    if opts.enable_packet_debug {
        stages.push(Stage::DebugHistory(Arc::new(DebugHistory::new(
            opts.packet_debug_buffer_size,
        ))));
    }
    PipelineHandle::new(stages)
}

/// Run authentication packets until the server accepts or rejects
fn run_exchange<S: Transport>(
    channel: &mut PacketChannel<S>,
    handshake: &mut Handshake,
    mut action: HandshakeAction,
) -> Result<(CapabilityFlags, OkPayload)> {
    loop {
        action = match action {
            HandshakeAction::SslRequest(request) => {
                channel.send(&request)?;
                channel.get_mut().upgrade_to_tls()?;
                tracing::debug!("transport upgraded to TLS");
                handshake.resume_after_tls()?
            }
            HandshakeAction::Write(packets) => {
                for packet in &packets {
                    channel.send(packet)?;
                }
                let payload = channel.read_packet()?;
                handshake.drive(payload.as_slice())?
            }
            HandshakeAction::Connected { capabilities, ok } => return Ok((capabilities, ok)),
        };
    }
}

/// Errors raised while reading a local file must not look like socket failures
fn local_file_error(file_name: &str, err: Error) -> Error {
    match err {
        Error::IoError(io) => Error::BadUsageError(format!("local infile '{file_name}': {io}")),
        other => other,
    }
}

impl<S: Transport> Conn<S> {
    /// Authenticate over an already connected transport
    pub fn with_transport(stream: S, opts: Opts) -> Result<Self> {
        Self::with_registry(stream, opts, AuthPluginRegistry::with_builtin())
    }

    /// Authenticate with a custom set of authentication plugins
    #[tracing::instrument(skip_all)]
    pub fn with_registry(mut stream: S, opts: Opts, mut registry: AuthPluginRegistry) -> Result<Self> {
        opts.validate()?;
        registry.disable(opts.disabled_auth_plugins.iter().cloned());
        let registry = Arc::new(registry);
        let secure_transport = stream.is_secure();
        let mut handshake = Handshake::new(HandshakeConfig::from(&opts), Arc::clone(&registry))?
            .on_secure_transport(secure_transport);

        stream.set_read_timeout(opts.socket_timeout)?;
        let mut channel = PacketChannel::new(stream, pipeline_for(&opts), opts.max_allowed_packet);

        let authenticated = channel
            .read_packet()
            .and_then(|greeting| handshake.drive(greeting.as_slice()))
            .and_then(|action| run_exchange(&mut channel, &mut handshake, action));
        let (capabilities, ok) = match authenticated {
            Ok(done) => done,
            Err(e) => {
                tracing::debug!(error = %e, "handshake failed");
                if let Err(shutdown) = channel.get_mut().shutdown() {
                    tracing::debug!(error = %shutdown, "shutdown after failed handshake");
                }
                return Err(e);
            }
        };

        let greeting = handshake
            .greeting()
            .ok_or_else(|| Error::LibraryBug(eyre!("authenticated without a greeting")))?;
        let mut session = ServerSession::new(
            capabilities,
            &greeting.server_version,
            greeting.connection_id,
            opts.character_encoding,
        );
        session.update_from_ok(&ok);
        session.set_schema(opts.db.clone());
        let seed = greeting.auth_plugin_data.clone();

        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            channel.enable_compression();
        }
        tracing::debug!(
            connection_id = session.connection_id(),
            server_version = session.server_version_string(),
            plugin = handshake.plugin_name(),
            compressed = channel.is_compressed(),
            "connected"
        );

        let mut conn = Self {
            channel,
            session,
            registry,
            encoders: EncoderRegistry::new(),
            session_zone: Utc.fix(),
            seed,
            auth_plugin: handshake.plugin_name(),
            secure: secure_transport || opts.tls,
            streaming: None,
            local_infile: None,
            write_buffer: Vec::new(),
            closed: false,
            opts,
        };
        if let Some(sql) = conn.opts.init_command.clone() {
            conn.query_drop(&sql)?;
        }
        Ok(conn)
    }

    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    pub fn connection_id(&self) -> u32 {
        self.session.connection_id()
    }

    pub fn server_version(&self) -> &str {
        self.session.server_version_string()
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> CapabilityFlags {
        self.session.capabilities()
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        self.channel.pipeline()
    }

    pub fn timing(&self) -> Option<Arc<TimingStats>> {
        self.channel.pipeline().timing()
    }

    pub fn transport(&self) -> &S {
        self.channel.get_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether a streamed result still has unread packets
    pub fn has_pending_stream(&self) -> bool {
        self.streaming.is_some()
    }

    /// Plugin that authenticated the current user
    pub fn auth_plugin(&self) -> Option<&'static str> {
        self.auth_plugin
    }

    pub fn encoders_mut(&mut self) -> &mut EncoderRegistry {
        &mut self.encoders
    }

    /// Zone instants are rendered in when a value carries none
    pub fn set_session_zone(&mut self, zone: FixedOffset) {
        self.session_zone = zone;
    }

    pub fn set_local_infile_handler(&mut self, handler: impl LocalInfileHandler + 'static) {
        self.local_infile = Some(Box::new(handler));
    }

    pub fn encode_context(&self) -> EncodeContext {
        EncodeContext::new(&self.session, &self.opts, self.session_zone)
    }

    fn result_options(&self, format: RowFormat) -> ResultSetOptions {
        ResultSetOptions {
            format,
            capabilities: self.session.capabilities(),
            charset: self.opts.character_encoding,
            concurrency: self.opts.result_set_concurrency,
            large_row_size_threshold: self.opts.large_row_size_threshold,
        }
    }

    fn force_close(&mut self, cause: &Error) {
        if self.closed {
            return;
        }
        tracing::warn!(error = %cause, "closing connection after fatal error");
        self.closed = true;
        self.streaming = None;
        if let Err(e) = self.channel.get_mut().shutdown() {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.force_close(e);
            }
        }
        result
    }

    fn ensure_ready(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if self.streaming.is_some() {
            match self.opts.streaming_policy {
                StreamingPolicy::Refuse => return Err(Error::StreamingDataOutstanding),
                StreamingPolicy::Close => self.drain_stream()?,
            }
        }
        Ok(())
    }

    /// Run one command with the open-connection and streaming checks
    fn run<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = match self.ensure_ready() {
            Ok(()) => f(self),
            Err(e) => Err(e),
        };
        self.finish(result)
    }

    fn begin_command(&mut self) {
        self.channel.reset_sequence();
        self.write_buffer.clear();
    }

    fn send_command(&mut self) -> Result<()> {
        self.channel.send(&self.write_buffer)
    }

    fn read_ok(&mut self) -> Result<OkPayload> {
        let payload = self.channel.read_packet()?;
        let ok = read_ok_or_err(payload.as_slice(), self.session.capabilities())?;
        self.session.update_from_ok(&ok);
        Ok(ok)
    }

    /// Read every result of the current command
    fn collect(
        &mut self,
        mut reader: ResultSetReader,
    ) -> Result<(Vec<StatementResult>, Option<ColumnDefinition>)> {
        let mut results = Vec::new();
        let mut current: Option<(ColumnDefinition, Vec<Row>)> = None;
        let mut cursor = None;
        let mut deferred = None;
        while !reader.is_finished() {
            let payload = self.channel.read_packet()?;
            match reader.drive(payload.as_slice())? {
                ResultEvent::NeedPacket => {}
                ResultEvent::Ok(ok) => {
                    self.session.update_from_ok(&ok);
                    results.push(StatementResult::Update(ok));
                }
                ResultEvent::LocalInfile(file_name) => {
                    if let Err(e) = self.send_local_infile(&file_name) {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        deferred = Some(e);
                    }
                }
                ResultEvent::ResultSetStart(columns) => current = Some((columns, Vec::new())),
                ResultEvent::Row(row) => {
                    if let Some((_, rows)) = current.as_mut() {
                        rows.push(row);
                    }
                }
                ResultEvent::ResultSetEnd(end) => {
                    self.session.update_from_ok(&end);
                    let (columns, rows) = current.take().ok_or_else(|| {
                        Error::LibraryBug(eyre!("result set ended before it started"))
                    })?;
                    results.push(StatementResult::Rows(ResultSet { columns, rows, end }));
                }
                ResultEvent::CursorOpened(columns, status) => {
                    self.session.update_status(status, 0);
                    cursor = Some(columns);
                }
            }
        }
        match deferred {
            Some(e) => Err(e),
            None => Ok((results, cursor)),
        }
    }

    fn read_results(&mut self, reader: ResultSetReader) -> Result<Vec<StatementResult>> {
        match self.collect(reader)? {
            (results, None) => Ok(results),
            (_, Some(_)) => Err(Error::LibraryBug(eyre!(
                "server opened a cursor that was not requested"
            ))),
        }
    }

    /// Answer a LOCAL INFILE request; the reply is read by the caller
    fn send_local_infile(&mut self, file_name: &str) -> Result<()> {
        tracing::debug!(file = file_name, "server requested a local file");
        let source = match self.local_infile.as_mut() {
            Some(handler) if self.opts.allow_load_local_infile => handler
                .open(file_name)
                .map_err(|e| local_file_error(file_name, e)),
            _ => Err(Error::LocalInfileDisabled(file_name.to_string())),
        };
        let outcome = match source {
            Ok(mut reader) => self.stream_local_file(file_name, &mut *reader),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            if e.is_fatal() {
                return outcome;
            }
            tracing::warn!(file = file_name, error = %e, "local infile aborted");
        }
        // an empty packet ends the file
        self.channel.send(&[])?;
        outcome
    }

    fn stream_local_file(&mut self, file_name: &str, reader: &mut dyn Read) -> Result<()> {
        let chunk_size = self
            .channel
            .max_allowed_packet()
            .saturating_sub(4)
            .clamp(1, LOCAL_INFILE_CHUNK);
        let mut buffer = self.opts.buffer_pool.get(chunk_size);
        buffer.resize(chunk_size, 0);
        let mut total = 0usize;
        loop {
            let n = reader
                .read(&mut buffer[..])
                .map_err(|e| local_file_error(file_name, e.into()))?;
            if n == 0 {
                tracing::debug!(file = file_name, bytes = total, "local file sent");
                return Ok(());
            }
            self.channel.send(&buffer[..n])?;
            total += n;
        }
    }

    /// Run a text query and collect every result it produces
    #[tracing::instrument(skip_all)]
    pub fn query(&mut self, sql: &str) -> Result<Vec<StatementResult>> {
        self.run(|conn| {
            conn.begin_command();
            write_query(
                &mut conn.write_buffer,
                sql,
                conn.opts.character_encoding,
                conn.session.capabilities(),
            );
            conn.send_command()?;
            conn.read_results(ResultSetReader::new(conn.result_options(RowFormat::Text)))
        })
    }

    /// Run a text query and discard its results
    pub fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.query(sql).map(drop)
    }

    /// Run a text query carrying query attributes
    #[tracing::instrument(skip_all)]
    pub fn query_with_attributes(
        &mut self,
        sql: &str,
        attributes: &[BindValue],
    ) -> Result<Vec<StatementResult>> {
        self.run(|conn| {
            let ctx = conn.encode_context();
            conn.begin_command();
            write_query_with_attributes(
                &mut conn.write_buffer,
                sql,
                attributes,
                conn.session.capabilities(),
                &conn.encoders,
                &ctx,
            )?;
            conn.send_command()?;
            conn.read_results(ResultSetReader::new(conn.result_options(RowFormat::Text)))
        })
    }

    /// Start a text query whose rows are read one at a time.
    ///
    /// Until the rows are exhausted or [`Conn::close_stream`] is called, other
    /// commands follow the configured [`StreamingPolicy`].
    #[tracing::instrument(skip_all)]
    pub fn query_streaming(&mut self, sql: &str) -> Result<StreamedResult> {
        self.run(|conn| {
            conn.begin_command();
            write_query(
                &mut conn.write_buffer,
                sql,
                conn.opts.character_encoding,
                conn.session.capabilities(),
            );
            conn.send_command()?;
            let reader = ResultSetReader::new(conn.result_options(RowFormat::Text));
            conn.advance_stream(reader)
        })
    }

    fn park(&mut self, reader: ResultSetReader) {
        if !reader.is_finished() {
            self.streaming = Some(reader);
        }
    }

    /// Read up to the next result set or update count
    fn advance_stream(&mut self, mut reader: ResultSetReader) -> Result<StreamedResult> {
        let mut deferred = None;
        loop {
            let payload = self.channel.read_packet()?;
            match reader.drive(payload.as_slice())? {
                ResultEvent::NeedPacket => {}
                ResultEvent::LocalInfile(file_name) => {
                    if let Err(e) = self.send_local_infile(&file_name) {
                        if e.is_fatal() {
                            return Err(e);
                        }
                        deferred = Some(e);
                    }
                }
                ResultEvent::Ok(ok) => {
                    self.session.update_from_ok(&ok);
                    self.park(reader);
                    return match deferred {
                        Some(e) => Err(e),
                        None => Ok(StreamedResult::Update(ok)),
                    };
                }
                ResultEvent::ResultSetStart(columns) => {
                    self.streaming = Some(reader);
                    return Ok(StreamedResult::Rows(columns));
                }
                other => {
                    return Err(Error::LibraryBug(eyre!(
                        "unexpected {other:?} before a result set"
                    )));
                }
            }
        }
    }

    fn next_row_inner(&mut self) -> Result<Option<Row>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let Some(mut reader) = self.streaming.take() else {
            return Ok(None);
        };
        if !reader.in_rows() {
            self.streaming = Some(reader);
            return Ok(None);
        }
        let payload = self.channel.read_packet()?;
        match reader.drive(payload.as_slice())? {
            ResultEvent::Row(row) => {
                self.streaming = Some(reader);
                Ok(Some(row))
            }
            ResultEvent::ResultSetEnd(end) => {
                self.session.update_from_ok(&end);
                self.park(reader);
                Ok(None)
            }
            other => Err(Error::LibraryBug(eyre!("unexpected {other:?} inside rows"))),
        }
    }

    /// Next row of the streamed result set; `None` once it ended
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let result = self.next_row_inner();
        self.finish(result)
    }

    /// Skip the rest of the current result and move to the next one of a
    /// multi-statement command. `None` when all results were read.
    pub fn next_result(&mut self) -> Result<Option<StreamedResult>> {
        let result = self.next_result_inner();
        self.finish(result)
    }

    fn next_result_inner(&mut self) -> Result<Option<StreamedResult>> {
        while self.next_row_inner()?.is_some() {}
        match self.streaming.take() {
            Some(reader) => self.advance_stream(reader).map(Some),
            None => Ok(None),
        }
    }

    fn drain_stream(&mut self) -> Result<()> {
        let Some(mut reader) = self.streaming.take() else {
            return Ok(());
        };
        let mut skipped = 0u64;
        while !reader.is_finished() {
            let payload = self.channel.read_packet()?;
            match reader.drive(payload.as_slice())? {
                ResultEvent::Row(_) => skipped += 1,
                ResultEvent::Ok(ok) | ResultEvent::ResultSetEnd(ok) => {
                    self.session.update_from_ok(&ok);
                }
                ResultEvent::LocalInfile(file_name) => {
                    tracing::debug!(file = file_name, "refusing local file while closing a stream");
                    self.channel.send(&[])?;
                }
                _ => {}
            }
        }
        tracing::debug!(skipped, "closed streamed result");
        Ok(())
    }

    /// Discard whatever a streamed command still has to send
    pub fn close_stream(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let result = self.drain_stream();
        self.finish(result)
    }

    fn read_definitions(&mut self, count: u16) -> Result<Option<ColumnDefinition>> {
        if count == 0 {
            return Ok(None);
        }
        let mut packets = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            packets.push(self.channel.read_packet()?.into_vec());
        }
        let definition = ColumnDefinition::parse(&packets, self.opts.character_encoding)?;
        if !self
            .session
            .has_capability(CapabilityFlags::CLIENT_DEPRECATE_EOF)
        {
            let payload = self.channel.read_packet()?;
            read_eof_packet(payload.as_slice())?;
        }
        Ok(Some(definition))
    }

    #[tracing::instrument(skip_all)]
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.run(|conn| {
            conn.begin_command();
            write_prepare(&mut conn.write_buffer, sql, conn.opts.character_encoding);
            conn.send_command()?;
            let payload = conn.channel.read_packet()?;
            let prepare_ok = *read_prepare_ok(payload.as_slice())?;
            let params = conn.read_definitions(prepare_ok.num_params())?;
            let columns = conn.read_definitions(prepare_ok.num_columns())?;
            tracing::debug!(
                statement_id = prepare_ok.statement_id(),
                params = prepare_ok.num_params(),
                columns = prepare_ok.num_columns(),
                "statement prepared"
            );
            Ok(PreparedStatement {
                id: prepare_ok.statement_id(),
                param_count: prepare_ok.num_params(),
                params,
                columns,
            })
        })
    }

    fn send_long_data_chunk(&mut self, statement_id: u32, index: u16, chunk: &[u8]) -> Result<()> {
        self.begin_command();
        write_send_long_data(&mut self.write_buffer, statement_id, index, chunk);
        self.send_command()
    }

    /// Ship one stream parameter ahead of COM_STMT_EXECUTE
    fn send_long_data(
        &mut self,
        statement_id: u32,
        index: u16,
        param: &BindValue,
        ctx: &EncodeContext,
    ) -> Result<()> {
        let chunk_size = self
            .channel
            .max_allowed_packet()
            .saturating_sub(LONG_DATA_HEADER)
            .clamp(1, LONG_DATA_CHUNK);
        let mut chunks = 0usize;
        match &param.source {
            BindSource::ByteStream(stream) => {
                let limit = stream.declared_length().filter(|_| ctx.use_stream_lengths);
                stream.for_each_chunk(limit, chunk_size, |chunk| {
                    chunks += 1;
                    self.send_long_data_chunk(statement_id, index, chunk)
                })?;
            }
            BindSource::CharStream(stream) => {
                let limit = stream.declared_length().filter(|_| ctx.use_stream_lengths);
                let text = stream.read_chars(limit)?;
                let bytes = ctx.charset.encode(&text);
                for chunk in bytes.chunks(chunk_size) {
                    chunks += 1;
                    self.send_long_data_chunk(statement_id, index, chunk)?;
                }
            }
            _ => return Ok(()),
        }
        // without any long data the server would read the value as NULL
        if chunks == 0 {
            self.send_long_data_chunk(statement_id, index, &[])?;
        }
        tracing::trace!(statement_id, index, chunks, "long data sent");
        Ok(())
    }

    fn send_execute(
        &mut self,
        statement: &PreparedStatement,
        params: &[BindValue],
        cursor: CursorType,
    ) -> Result<()> {
        if params.len() != usize::from(statement.param_count) {
            return Err(Error::BadUsageError(format!(
                "statement expects {} parameters, got {}",
                statement.param_count,
                params.len()
            )));
        }
        for param in params {
            check_stream_target(param)?;
        }
        let ctx = self.encode_context();
        for (index, param) in (0u16..).zip(params) {
            if param.is_stream() {
                self.send_long_data(statement.id, index, param, &ctx)?;
            }
        }
        self.begin_command();
        write_execute(
            &mut self.write_buffer,
            statement.id,
            cursor,
            params,
            self.session.capabilities(),
            &self.encoders,
            &ctx,
        )?;
        self.send_command()
    }

    fn statement_reader(&self, statement: &PreparedStatement) -> ResultSetReader {
        let options = self.result_options(RowFormat::Binary);
        match &statement.columns {
            Some(columns) => ResultSetReader::with_cached_columns(options, columns.clone()),
            None => ResultSetReader::new(options),
        }
    }

    /// Execute a prepared statement and collect its results
    #[tracing::instrument(skip_all)]
    pub fn execute(
        &mut self,
        statement: &PreparedStatement,
        params: &[BindValue],
    ) -> Result<Vec<StatementResult>> {
        self.run(|conn| {
            conn.send_execute(statement, params, CursorType::NoCursor)?;
            let reader = conn.statement_reader(statement);
            conn.read_results(reader)
        })
    }

    /// Execute through a read-only server cursor, fetching `opts.fetch_size`
    /// rows per round trip until the server reports the last row
    #[tracing::instrument(skip_all)]
    pub fn execute_with_cursor(
        &mut self,
        statement: &PreparedStatement,
        params: &[BindValue],
    ) -> Result<StatementResult> {
        self.run(|conn| {
            conn.send_execute(statement, params, CursorType::ReadOnly)?;
            let reader = conn.statement_reader(statement);
            match conn.collect(reader)? {
                (_, Some(columns)) => conn.fetch_all(statement.id, columns),
                (results, None) => results.into_iter().next().ok_or_else(|| {
                    Error::LibraryBug(eyre!("statement execution produced no result"))
                }),
            }
        })
    }

    fn fetch_all(&mut self, statement_id: u32, columns: ColumnDefinition) -> Result<StatementResult> {
        let options = self.result_options(RowFormat::Binary);
        let mut rows = Vec::new();
        let mut batches = 0u32;
        loop {
            self.begin_command();
            write_fetch(&mut self.write_buffer, statement_id, self.opts.fetch_size);
            self.send_command()?;
            batches += 1;

            let mut reader = ResultSetReader::for_fetch(options, columns.clone());
            let end = loop {
                let payload = self.channel.read_packet()?;
                match reader.drive(payload.as_slice())? {
                    ResultEvent::Row(row) => rows.push(row),
                    ResultEvent::ResultSetEnd(end) => break end,
                    other => {
                        return Err(Error::LibraryBug(eyre!(
                            "unexpected {other:?} while fetching"
                        )));
                    }
                }
            };
            self.session.update_from_ok(&end);
            let status = end.status_flags;
            if status.contains(ServerStatusFlags::SERVER_STATUS_LAST_ROW_SENT)
                || !status.contains(ServerStatusFlags::SERVER_STATUS_CURSOR_EXISTS)
            {
                tracing::debug!(statement_id, batches, rows = rows.len(), "cursor exhausted");
                return Ok(StatementResult::Rows(ResultSet { columns, rows, end }));
            }
        }
    }

    /// Drop long data sent so far and close the statement's cursor
    pub fn reset_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_reset_statement(&mut conn.write_buffer, statement.id);
            conn.send_command()?;
            conn.read_ok().map(drop)
        })
    }

    /// Deallocate the statement; the server does not answer
    pub fn close_statement(&mut self, statement: PreparedStatement) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_close_statement(&mut conn.write_buffer, statement.id);
            conn.send_command()
        })
    }

    #[tracing::instrument(skip_all)]
    pub fn ping(&mut self) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_ping(&mut conn.write_buffer);
            conn.send_command()?;
            conn.read_ok().map(drop)
        })
    }

    /// Switch the default schema
    pub fn init_db(&mut self, database: &str) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_init_db(&mut conn.write_buffer, database, conn.opts.character_encoding);
            conn.send_command()?;
            conn.read_ok()?;
            conn.session.set_schema(Some(database.to_string()));
            Ok(())
        })
    }

    /// Reset session state without re-authenticating
    pub fn reset_connection(&mut self) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_reset_connection(&mut conn.write_buffer);
            conn.send_command()?;
            conn.read_ok().map(drop)
        })
    }

    /// Toggle multi-statement support; the server answers with EOF
    pub fn set_option(&mut self, option: SetOption) -> Result<()> {
        self.run(|conn| {
            conn.begin_command();
            write_set_option(&mut conn.write_buffer, option);
            conn.send_command()?;
            let capabilities = conn.session.capabilities();
            let payload = conn.channel.read_packet()?;
            let bytes = payload.as_slice();
            match bytes.first() {
                Some(0xFE) if !capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) => {
                    let eof = read_eof_packet(bytes)?;
                    conn.session.update_status(eof.status_flags(), eof.warnings());
                }
                Some(0xFE) => {
                    let ok = OkPayload::parse(bytes, capabilities)?;
                    conn.session.update_from_ok(&ok);
                }
                _ => {
                    let ok = read_ok_or_err(bytes, capabilities)?;
                    conn.session.update_from_ok(&ok);
                }
            }
            Ok(())
        })
    }

    /// Re-authenticate as another user with COM_CHANGE_USER.
    ///
    /// A failure leaves the session in an unknown state, so any error closes
    /// the connection.
    #[tracing::instrument(skip_all)]
    pub fn change_user(
        &mut self,
        user: &str,
        password: Option<&str>,
        database: Option<&str>,
    ) -> Result<()> {
        let result = self.run(|conn| {
            let mut config = HandshakeConfig::from(&conn.opts);
            config.user = user.to_string();
            config.passwords = [password.map(str::to_string), None, None];
            config.database = database.map(str::to_string);

            conn.begin_command();
            let (mut handshake, request) = Handshake::change_user(
                config,
                Arc::clone(&conn.registry),
                conn.session.capabilities(),
                conn.seed.clone(),
                conn.auth_plugin,
                conn.secure,
            )?;
            conn.channel.send(&request)?;
            let payload = conn.channel.read_packet()?;
            let action = handshake.drive(payload.as_slice())?;
            let (_, ok) = run_exchange(&mut conn.channel, &mut handshake, action)?;

            conn.session.update_from_ok(&ok);
            conn.session.set_schema(database.map(str::to_string));
            conn.auth_plugin = handshake.plugin_name().or(conn.auth_plugin);
            conn.opts.user = user.to_string();
            conn.opts.password = password.map(str::to_string);
            conn.opts.password2 = None;
            conn.opts.password3 = None;
            conn.opts.db = database.map(str::to_string);
            tracing::debug!(user, "user changed");
            Ok(())
        });
        if let Err(e) = &result {
            if !matches!(e, Error::StreamingDataOutstanding) {
                self.force_close(e);
            }
        }
        result
    }

    /// Load the session variables value rendering depends on
    pub fn refresh_server_variables(&mut self) -> Result<()> {
        let results = self.query(
            "SELECT @@session.sql_mode AS sql_mode, \
             @@session.max_allowed_packet AS max_allowed_packet, \
             @@session.time_zone AS time_zone",
        )?;
        let Some(StatementResult::Rows(set)) = results.first() else {
            return Err(Error::InvalidPacket);
        };
        let Some(row) = set.rows.first() else {
            return Ok(());
        };
        for (idx, field) in set.columns.fields().iter().enumerate() {
            if let Some(bytes) = row.raw(idx)? {
                let value = self.opts.character_encoding.decode(bytes)?;
                self.session.set_variable(field.name(), value.into_owned());
            }
        }
        if let Some(server_max) = self
            .session
            .variable("max_allowed_packet")
            .and_then(|v| v.parse::<usize>().ok())
        {
            let max = server_max.min(self.opts.max_allowed_packet);
            self.channel.set_max_allowed_packet(max);
        }
        tracing::debug!(
            no_backslash_escapes = self.session.no_backslash_escapes(),
            "server variables loaded"
        );
        Ok(())
    }

    /// Override the read timeout for the commands run by `f`.
    ///
    /// The previous timeout is restored when `f` returns, fails or panics.
    pub fn with_timeout<T>(
        &mut self,
        timeout: Duration,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if timeout.is_zero() {
            return Err(Error::BadUsageError("timeout must be positive".to_string()));
        }
        let previous = self.channel.get_ref().read_timeout()?;
        self.channel.get_mut().set_read_timeout(Some(timeout))?;
        let mut guard = TimeoutGuard {
            conn: self,
            previous,
        };
        f(&mut *guard)
    }

    /// Send COM_QUIT and shut the transport down
    pub fn quit(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.streaming = None;
        self.begin_command();
        write_quit(&mut self.write_buffer);
        let sent = self.send_command();
        self.closed = true;
        if let Err(e) = self.channel.get_mut().shutdown() {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
        sent
    }
}

struct TimeoutGuard<'a, S: Transport> {
    conn: &'a mut Conn<S>,
    previous: Option<Duration>,
}

impl<S: Transport> Deref for TimeoutGuard<'_, S> {
    type Target = Conn<S>;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl<S: Transport> DerefMut for TimeoutGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl<S: Transport> Drop for TimeoutGuard<'_, S> {
    fn drop(&mut self) {
        if self.conn.closed {
            return;
        }
        if let Err(e) = self.conn.channel.get_mut().set_read_timeout(self.previous) {
            tracing::warn!(error = %e, "failed to restore read timeout");
        }
    }
}
