//! Rendering of bound values as SQL literals, binary protocol values and
//! query attributes.
//!
//! Every encoder dispatches on `BindValue::target` and fails with
//! `Error::TypeMismatch` for targets it has no rendering for.

mod boolean;
pub mod escape;
mod number;
mod stream;
mod string;
mod temporal;
mod zoned;

use std::sync::Arc;

use auto_impl::auto_impl;
use chrono::{FixedOffset, Offset, Utc};

pub use boolean::BooleanEncoder;
pub use number::NumberEncoder;
pub(crate) use stream::check_stream_target;
pub use stream::{ByteStreamEncoder, CharStreamEncoder};
pub use string::{BytesEncoder, StringEncoder};
pub use temporal::{DateEncoder, DateTimeEncoder, DurationEncoder, TimeEncoder};
pub use zoned::{InstantEncoder, OffsetTimeEncoder};

use crate::charset::Charset;
use crate::constant::ColumnType;
use crate::error::Result;
use crate::opts::Opts;
use crate::session::ServerSession;
use crate::value::bind::{BindSource, BindValue};

/// Column decimals value meaning "not fixed"
const DECIMALS_NOT_FIXED: u8 = 31;

/// Session-wide inputs to value rendering
#[derive(Debug, Clone)]
pub struct EncodeContext {
    /// Server is at least 5.6.4
    pub supports_fractional_seconds: bool,
    pub send_fractional_seconds: bool,
    pub send_fractional_seconds_for_time: bool,
    /// `TIME_TRUNCATE_FRACTIONAL` is in the server's sql_mode
    pub time_truncate_fractional: bool,
    pub no_backslash_escapes: bool,
    pub charset: Charset,
    /// Zone instants are converted to before rendering
    pub session_zone: FixedOffset,
    pub use_stream_lengths: bool,
}

impl Default for EncodeContext {
    fn default() -> Self {
        Self {
            supports_fractional_seconds: true,
            send_fractional_seconds: true,
            send_fractional_seconds_for_time: true,
            time_truncate_fractional: false,
            no_backslash_escapes: false,
            charset: Charset::Utf8mb4,
            session_zone: Utc.fix(),
            use_stream_lengths: true,
        }
    }
}

impl EncodeContext {
    pub fn new(session: &ServerSession, opts: &Opts, session_zone: FixedOffset) -> Self {
        Self {
            supports_fractional_seconds: session.supports_fractional_seconds(),
            send_fractional_seconds: opts.send_fractional_seconds,
            send_fractional_seconds_for_time: opts.send_fractional_seconds_for_time,
            time_truncate_fractional: session.time_truncate_fractional(),
            no_backslash_escapes: session.no_backslash_escapes(),
            charset: opts.character_encoding,
            session_zone,
            use_stream_lengths: opts.use_stream_lengths_in_prep_stmts,
        }
    }

    /// Fractional digits kept for a temporal value, `None` to drop them.
    ///
    /// The bound column's declared decimals cap the digits; 6 when unknown.
    pub fn fractional_digits(&self, bind: &BindValue, for_time: bool) -> Option<u8> {
        if !self.supports_fractional_seconds || !self.send_fractional_seconds {
            return None;
        }
        if for_time && !self.send_fractional_seconds_for_time {
            return None;
        }
        let digits = match bind.field.as_deref().map(|f| f.decimals) {
            Some(d) if d != DECIMALS_NOT_FIXED => d.min(6),
            _ => 6,
        };
        Some(digits)
    }

    /// Apply the fractional policy; the flag reports a carry into the next second
    pub fn adjust_nanos(&self, nanos: u32, digits: Option<u8>) -> (u32, bool) {
        match digits {
            None => (0, false),
            Some(d) => crate::value::temporal::adjust_nanos(nanos, d, self.time_truncate_fractional),
        }
    }

    pub(crate) fn stream_limit(&self, bind: &BindValue, declared: Option<u64>) -> Option<u64> {
        if !self.use_stream_lengths {
            return None;
        }
        declared.or(bind.scale_or_length.map(u64::from))
    }
}

/// Renders one family of bound values
#[auto_impl(&, Box, Arc)]
pub trait ValueEncoder: Send + Sync {
    /// SQL literal for a text query
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>>;

    /// Value bytes of COM_STMT_EXECUTE; never called for NULL
    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()>;

    fn encode_as_query_attribute(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        self.encode_as_binary(bind, ctx, out)
    }

    /// Type byte and unsigned flag announced for the binary value
    fn binary_type(&self, bind: &BindValue) -> (ColumnType, bool) {
        (bind.target.binary_param_type(), bind.target.is_unsigned())
    }

    fn query_attribute_type(&self, bind: &BindValue) -> (ColumnType, bool) {
        self.binary_type(bind)
    }
}

pub type EncoderPredicate = Box<dyn Fn(&BindValue) -> bool + Send + Sync>;

static BOOLEAN: BooleanEncoder = BooleanEncoder;
static NUMBER: NumberEncoder = NumberEncoder;
static STRING: StringEncoder = StringEncoder;
static BYTES: BytesEncoder = BytesEncoder;
static BYTE_STREAM: ByteStreamEncoder = ByteStreamEncoder;
static CHAR_STREAM: CharStreamEncoder = CharStreamEncoder;
static DATE: DateEncoder = DateEncoder;
static TIME: TimeEncoder = TimeEncoder;
static DURATION: DurationEncoder = DurationEncoder;
static DATETIME: DateTimeEncoder = DateTimeEncoder;
static INSTANT: InstantEncoder = InstantEncoder;
static OFFSET_TIME: OffsetTimeEncoder = OffsetTimeEncoder;

fn builtin_encoder(source: &BindSource) -> Option<&'static dyn ValueEncoder> {
    let encoder: &'static dyn ValueEncoder = match source {
        BindSource::Null | BindSource::Other(_) => return None,
        BindSource::Bool(_) => &BOOLEAN,
        BindSource::I8(_)
        | BindSource::I16(_)
        | BindSource::I32(_)
        | BindSource::I64(_)
        | BindSource::U8(_)
        | BindSource::U16(_)
        | BindSource::U32(_)
        | BindSource::U64(_)
        | BindSource::BigInteger(_)
        | BindSource::F32(_)
        | BindSource::F64(_)
        | BindSource::Decimal(_) => &NUMBER,
        BindSource::String(_) => &STRING,
        BindSource::Bytes(_) => &BYTES,
        BindSource::ByteStream(_) => &BYTE_STREAM,
        BindSource::CharStream(_) => &CHAR_STREAM,
        BindSource::Date(_) => &DATE,
        BindSource::Time(_) => &TIME,
        BindSource::Duration(_) => &DURATION,
        BindSource::DateTime(_) => &DATETIME,
        BindSource::Instant(_) | BindSource::Zoned(_) | BindSource::SystemTime(_) => &INSTANT,
        BindSource::OffsetTime(_) => &OFFSET_TIME,
    };
    Some(encoder)
}

/// Picks the encoder of a bound value.
///
/// User registrations are tried in order before the built-in set.
#[derive(Default)]
pub struct EncoderRegistry {
    custom: Vec<(EncoderPredicate, Arc<dyn ValueEncoder>)>,
}

impl std::fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("custom", &self.custom.len())
            .finish()
    }
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        predicate: impl Fn(&BindValue) -> bool + Send + Sync + 'static,
        encoder: Arc<dyn ValueEncoder>,
    ) {
        self.custom.push((Box::new(predicate), encoder));
    }

    pub fn encoder_for(&self, bind: &BindValue) -> Result<&dyn ValueEncoder> {
        if let Some((_, encoder)) = self.custom.iter().find(|(matches, _)| matches(bind)) {
            return Ok(encoder.as_ref());
        }
        builtin_encoder(&bind.source).ok_or_else(|| bind.type_mismatch())
    }

    pub fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        if bind.is_null() {
            return Ok(b"NULL".to_vec());
        }
        self.encoder_for(bind)?.encode_as_text(bind, ctx)
    }

    /// Type bytes of a parameter; NULL is announced as MYSQL_TYPE_NULL
    pub fn binary_type(&self, bind: &BindValue) -> Result<(ColumnType, bool)> {
        if bind.is_null() {
            return Ok((ColumnType::MYSQL_TYPE_NULL, false));
        }
        Ok(self.encoder_for(bind)?.binary_type(bind))
    }

    pub fn query_attribute_type(&self, bind: &BindValue) -> Result<(ColumnType, bool)> {
        if bind.is_null() {
            return Ok((ColumnType::MYSQL_TYPE_NULL, false));
        }
        Ok(self.encoder_for(bind)?.query_attribute_type(bind))
    }

    pub fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if bind.is_null() {
            return Ok(());
        }
        self.encoder_for(bind)?.encode_as_binary(bind, ctx, out)
    }

    pub fn encode_as_query_attribute(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if bind.is_null() {
            return Ok(());
        }
        self.encoder_for(bind)?.encode_as_query_attribute(bind, ctx, out)
    }
}
