use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};

use crate::constant::ColumnType;
use crate::error::Result;
use crate::protocol::primitive::write_bytes_lenenc;
use crate::value::SqlType;
use crate::value::bind::{BindSource, BindValue, OffsetTime};
use crate::value::encode::escape::quote_plain;
use crate::value::encode::temporal::{
    Temporal, temporal_binary, temporal_text, write_binary_timestamp_with_offset,
};
use crate::value::encode::{EncodeContext, ValueEncoder};
use crate::value::temporal::{InternalTime, InternalTimestamp};

fn offset_minutes(offset: &FixedOffset) -> i16 {
    (offset.local_minus_utc() / 60) as i16
}

/// Absolute points in time: `DateTime<Utc>`, `DateTime<FixedOffset>` and `SystemTime`.
///
/// DATETIME and TIMESTAMP columns have no zone, so the instant is shown in
/// the bind's zone, falling back to the session zone. Query attributes carry
/// the offset explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantEncoder;

impl InstantEncoder {
    fn zoned(bind: &BindValue, ctx: &EncodeContext) -> Result<DateTime<FixedOffset>> {
        let zone = bind.zone.unwrap_or(ctx.session_zone);
        let instant = match &bind.source {
            BindSource::Instant(dt) => dt.with_timezone(&zone),
            BindSource::Zoned(dt) => dt.with_timezone(&zone),
            BindSource::SystemTime(t) => DateTime::<Utc>::from(*t).with_timezone(&zone),
            _ => return Err(bind.type_mismatch()),
        };
        Ok(instant)
    }

    fn local(bind: &BindValue, ctx: &EncodeContext) -> Result<Temporal> {
        Ok(Temporal::DateTime(Self::zoned(bind, ctx)?.naive_local()))
    }
}

impl ValueEncoder for InstantEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        temporal_text(Self::local(bind, ctx)?, bind, ctx)
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        temporal_binary(Self::local(bind, ctx)?, bind, ctx, out)
    }

    fn encode_as_query_attribute(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if !matches!(bind.target, SqlType::DateTime | SqlType::Timestamp) {
            return self.encode_as_binary(bind, ctx, out);
        }
        let zoned = Self::zoned(bind, ctx)?;
        let mut ts = InternalTimestamp::from(zoned.naive_local());
        // attributes always carry microseconds, so only sub-micro digits go
        ts.nanos = ts.nanos / 1000 * 1000;
        write_binary_timestamp_with_offset(out, &ts, offset_minutes(zoned.offset()));
        Ok(())
    }
}

/// Time of day with a UTC offset.
///
/// TIME columns get the time shifted into the session offset; character
/// columns get the ISO form with its offset, e.g. `10:15:30+01:00`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetTimeEncoder;

impl OffsetTimeEncoder {
    fn source(bind: &BindValue) -> Result<OffsetTime> {
        match bind.source {
            BindSource::OffsetTime(t) => Ok(t),
            _ => Err(bind.type_mismatch()),
        }
    }

    fn in_session_zone(value: OffsetTime, ctx: &EncodeContext) -> Temporal {
        let shift = ctx.session_zone.local_minus_utc() - value.offset.local_minus_utc();
        let (time, _) = value
            .time
            .overflowing_add_signed(TimeDelta::seconds(i64::from(shift)));
        Temporal::Time(time.signed_duration_since(NaiveTime::MIN))
    }

    fn iso_literal(value: OffsetTime, bind: &BindValue, ctx: &EncodeContext) -> String {
        let digits = ctx.fractional_digits(bind, true);
        let mut time = InternalTime::from(value.time);
        // a carry past the last second is dropped, the time of day cannot wrap here
        time.nanos = ctx.adjust_nanos(time.nanos, digits).0;
        format!("{}{}", time.to_literal(digits.unwrap_or(0)), value.offset)
    }
}

impl ValueEncoder for OffsetTimeEncoder {
    fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let value = Self::source(bind)?;
        match bind.target {
            SqlType::Time => temporal_text(Self::in_session_zone(value, ctx), bind, ctx),
            t if t.is_text() || t == SqlType::Unknown => {
                Ok(quote_plain(&Self::iso_literal(value, bind, ctx)))
            }
            _ => Err(bind.type_mismatch()),
        }
    }

    fn encode_as_binary(
        &self,
        bind: &BindValue,
        ctx: &EncodeContext,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let value = Self::source(bind)?;
        match bind.target {
            SqlType::Time => temporal_binary(Self::in_session_zone(value, ctx), bind, ctx, out),
            t if t.is_text() || t == SqlType::Unknown => {
                write_bytes_lenenc(out, Self::iso_literal(value, bind, ctx).as_bytes());
                Ok(())
            }
            _ => Err(bind.type_mismatch()),
        }
    }

    fn binary_type(&self, bind: &BindValue) -> (ColumnType, bool) {
        match bind.target {
            SqlType::Time => (ColumnType::MYSQL_TYPE_TIME, false),
            _ => (ColumnType::MYSQL_TYPE_STRING, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;

    fn plus(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn instants_render_in_the_session_zone() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let ctx = EncodeContext {
            session_zone: plus(2),
            ..EncodeContext::default()
        };
        let bind = BindValue::new(instant);
        let text = InstantEncoder.encode_as_text(&bind, &ctx).unwrap();
        assert_eq!(text, b"'2024-03-02 01:30:00'".to_vec());

        let bind = BindValue::new(instant).with_zone(plus(-1));
        let text = InstantEncoder.encode_as_text(&bind, &ctx).unwrap();
        assert_eq!(text, b"'2024-03-01 22:30:00'".to_vec());
    }

    #[test]
    fn query_attribute_carries_offset() {
        let instant = plus(1)
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(3, 4, 5)
                    .unwrap(),
            )
            .unwrap();
        let bind = BindValue::new(instant).with_zone(plus(1));
        let mut out = Vec::new();
        InstantEncoder
            .encode_as_query_attribute(&bind, &EncodeContext::default(), &mut out)
            .unwrap();
        assert_eq!(
            out,
            vec![13, 0xE8, 0x07, 1, 2, 3, 4, 5, 0, 0, 0, 0, 60, 0]
        );
    }

    #[test]
    fn offset_time_forms() {
        let value = OffsetTime {
            time: NaiveTime::from_hms_opt(10, 15, 30).unwrap(),
            offset: plus(1),
        };
        let ctx = EncodeContext::default();
        let bind = BindValue::new(value).with_target(SqlType::VarChar);
        assert_eq!(
            OffsetTimeEncoder.encode_as_text(&bind, &ctx).unwrap(),
            b"'10:15:30+01:00'".to_vec()
        );
        let bind = BindValue::new(value);
        assert_eq!(
            OffsetTimeEncoder.encode_as_text(&bind, &ctx).unwrap(),
            b"'09:15:30'".to_vec()
        );
    }
}
