use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::error::Result;
use crate::protocol::primitive::{write_bytes_lenenc, write_int_1, write_int_2, write_int_4};
use crate::value::SqlType;
use crate::value::bind::{BindSource, BindValue};
use crate::value::encode::escape::quote_plain;
use crate::value::encode::{EncodeContext, ValueEncoder};
use crate::value::temporal::{InternalDate, InternalTime, InternalTimestamp};

/// Temporal value normalized before rendering
#[derive(Debug, Clone, Copy)]
pub(crate) enum Temporal {
    Date(NaiveDate),
    /// Signed span, since TIME columns hold durations
    Time(TimeDelta),
    DateTime(NaiveDateTime),
}

fn epoch_date() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

impl Temporal {
    /// Cut fractional seconds to the context's policy, carrying into the next second
    fn adjusted(self, bind: &BindValue, ctx: &EncodeContext) -> Self {
        let for_time = matches!(self, Self::Time(_)) || bind.target == SqlType::Time;
        let digits = ctx.fractional_digits(bind, for_time);
        match self {
            Self::Date(_) => self,
            Self::Time(delta) => {
                // the magnitude is adjusted so negative values move toward zero
                let magnitude = delta.abs();
                let (nanos, carry) = ctx.adjust_nanos(magnitude.subsec_nanos().unsigned_abs(), digits);
                let whole = TimeDelta::seconds(magnitude.num_seconds() + i64::from(carry));
                let magnitude = whole + TimeDelta::nanoseconds(i64::from(nanos));
                Self::Time(if delta < TimeDelta::zero() { -magnitude } else { magnitude })
            }
            Self::DateTime(dt) => {
                let (nanos, carry) = ctx.adjust_nanos(dt.nanosecond().min(999_999_999), digits);
                let base = dt.with_nanosecond(nanos).unwrap_or(dt);
                let shifted = if carry {
                    base.checked_add_signed(TimeDelta::seconds(1)).unwrap_or(base)
                } else {
                    base
                };
                Self::DateTime(shifted)
            }
        }
    }

    fn digits(self, bind: &BindValue, ctx: &EncodeContext) -> u8 {
        let for_time = matches!(self, Self::Time(_)) || bind.target == SqlType::Time;
        ctx.fractional_digits(bind, for_time).unwrap_or(0)
    }

    /// Reshape the value for the bound column type, `None` when it cannot be
    fn for_target(self, target: SqlType) -> Option<Self> {
        let value = match (self, target) {
            (Self::Date(_), SqlType::Date) => self,
            (Self::DateTime(dt), SqlType::Date) => Self::Date(dt.date()),
            (Self::Time(_), SqlType::Time) => self,
            (Self::DateTime(dt), SqlType::Time) => {
                Self::Time(dt.time().signed_duration_since(NaiveTime::MIN))
            }
            (Self::Date(d), SqlType::DateTime | SqlType::Timestamp) => {
                Self::DateTime(d.and_time(NaiveTime::MIN))
            }
            (Self::Time(delta), SqlType::DateTime | SqlType::Timestamp) => {
                let midnight = epoch_date().and_time(NaiveTime::MIN);
                Self::DateTime(midnight.checked_add_signed(delta)?)
            }
            (Self::DateTime(_), SqlType::DateTime | SqlType::Timestamp) => self,
            (_, t) if t.is_text() || t == SqlType::Year || t == SqlType::Unknown => self,
            _ => return None,
        };
        Some(value)
    }

    fn year(self) -> Option<i32> {
        match self {
            Self::Date(d) => Some(d.year()),
            Self::DateTime(dt) => Some(dt.year()),
            Self::Time(_) => None,
        }
    }

    /// Literal without quotes
    pub(crate) fn literal(self, digits: u8) -> String {
        match self {
            Self::Date(d) => InternalDate::from(d).to_literal(),
            Self::Time(delta) => InternalTime::from_duration(delta).to_literal(digits),
            Self::DateTime(dt) => InternalTimestamp::from(dt).to_literal(digits),
        }
    }
}

pub(crate) fn write_binary_date(out: &mut Vec<u8>, date: &InternalDate) {
    write_int_1(out, 4);
    write_int_2(out, date.year);
    write_int_1(out, date.month);
    write_int_1(out, date.day);
}

fn write_datetime_fields(out: &mut Vec<u8>, ts: &InternalTimestamp, with_micros: bool) {
    write_int_2(out, ts.year);
    write_int_1(out, ts.month);
    write_int_1(out, ts.day);
    write_int_1(out, ts.hour);
    write_int_1(out, ts.minute);
    write_int_1(out, ts.second);
    if with_micros {
        write_int_4(out, ts.nanos / 1000);
    }
}

/// Length 7, or 11 when there are microseconds
pub(crate) fn write_binary_datetime(out: &mut Vec<u8>, ts: &InternalTimestamp) {
    let with_micros = ts.nanos / 1000 != 0;
    write_int_1(out, if with_micros { 11 } else { 7 });
    write_datetime_fields(out, ts, with_micros);
}

/// Length 13: full datetime followed by the UTC offset in minutes
pub(crate) fn write_binary_timestamp_with_offset(
    out: &mut Vec<u8>,
    ts: &InternalTimestamp,
    offset_minutes: i16,
) {
    write_int_1(out, 13);
    write_datetime_fields(out, ts, true);
    out.extend_from_slice(&offset_minutes.to_le_bytes());
}

/// Length 8, or 12 when there are microseconds
pub(crate) fn write_binary_time(out: &mut Vec<u8>, time: &InternalTime) {
    let with_micros = time.nanos / 1000 != 0;
    write_int_1(out, if with_micros { 12 } else { 8 });
    write_int_1(out, u8::from(time.negative && !time.is_zero()));
    write_int_4(out, time.days());
    write_int_1(out, (time.hours % 24) as u8);
    write_int_1(out, time.minutes);
    write_int_1(out, time.seconds);
    if with_micros {
        write_int_4(out, time.nanos / 1000);
    }
}

fn reshape(value: Temporal, bind: &BindValue, ctx: &EncodeContext) -> Result<Temporal> {
    value
        .adjusted(bind, ctx)
        .for_target(bind.target)
        .ok_or_else(|| bind.type_mismatch())
}

pub(crate) fn temporal_text(value: Temporal, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
    let digits = value.digits(bind, ctx);
    let value = reshape(value, bind, ctx)?;
    if bind.target == SqlType::Year {
        let year = value.year().ok_or_else(|| bind.type_mismatch())?;
        return Ok(year.to_string().into_bytes());
    }
    Ok(quote_plain(&value.literal(digits)))
}

pub(crate) fn temporal_binary(
    value: Temporal,
    bind: &BindValue,
    ctx: &EncodeContext,
    out: &mut Vec<u8>,
) -> Result<()> {
    let digits = value.digits(bind, ctx);
    let value = reshape(value, bind, ctx)?;
    match (bind.target, value) {
        (SqlType::Year, _) => {
            let year = value.year().ok_or_else(|| bind.type_mismatch())?;
            write_int_2(out, year.clamp(0, i32::from(u16::MAX)) as u16);
        }
        (SqlType::Date, Temporal::Date(d)) => write_binary_date(out, &InternalDate::from(d)),
        (SqlType::Time, Temporal::Time(t)) => {
            write_binary_time(out, &InternalTime::from_duration(t));
        }
        (SqlType::DateTime | SqlType::Timestamp, Temporal::DateTime(dt)) => {
            write_binary_datetime(out, &InternalTimestamp::from(dt));
        }
        _ => write_bytes_lenenc(out, value.literal(digits).as_bytes()),
    }
    Ok(())
}

/// `NaiveDate`
#[derive(Debug, Clone, Copy, Default)]
pub struct DateEncoder;

/// `NaiveTime`, a time of day
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeEncoder;

/// `TimeDelta`, for TIME columns holding signed spans
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationEncoder;

/// `NaiveDateTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeEncoder;

fn local_value(bind: &BindValue) -> Result<Temporal> {
    match bind.source {
        BindSource::Date(d) => Ok(Temporal::Date(d)),
        BindSource::Time(t) => Ok(Temporal::Time(t.signed_duration_since(NaiveTime::MIN))),
        BindSource::Duration(d) => Ok(Temporal::Time(d)),
        BindSource::DateTime(dt) => Ok(Temporal::DateTime(dt)),
        _ => Err(bind.type_mismatch()),
    }
}

macro_rules! local_temporal_encoder {
    ($($encoder:ident),*) => {
        $(
            impl ValueEncoder for $encoder {
                fn encode_as_text(&self, bind: &BindValue, ctx: &EncodeContext) -> Result<Vec<u8>> {
                    temporal_text(local_value(bind)?, bind, ctx)
                }

                fn encode_as_binary(
                    &self,
                    bind: &BindValue,
                    ctx: &EncodeContext,
                    out: &mut Vec<u8>,
                ) -> Result<()> {
                    temporal_binary(local_value(bind)?, bind, ctx, out)
                }
            }
        )*
    };
}

local_temporal_encoder!(DateEncoder, TimeEncoder, DurationEncoder, DateTimeEncoder);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    fn text(encoder: &dyn ValueEncoder, bind: &BindValue, ctx: &EncodeContext) -> String {
        String::from_utf8(encoder.encode_as_text(bind, ctx).unwrap()).unwrap()
    }

    fn no_fractions() -> EncodeContext {
        EncodeContext {
            send_fractional_seconds: false,
            ..EncodeContext::default()
        }
    }

    #[test]
    fn datetime_literal_rounds_to_micros() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_nano_opt(3, 4, 5, 123_456_789)
            .unwrap();
        let bind = BindValue::new(dt);
        let ctx = EncodeContext::default();
        assert_eq!(text(&DateTimeEncoder, &bind, &ctx), "'2024-01-02 03:04:05.123457'");
        assert_eq!(text(&DateTimeEncoder, &bind, &no_fractions()), "'2024-01-02 03:04:05'");

        let truncating = EncodeContext {
            time_truncate_fractional: true,
            ..EncodeContext::default()
        };
        assert_eq!(text(&DateTimeEncoder, &bind, &truncating), "'2024-01-02 03:04:05.123456'");
    }

    #[test]
    fn rounding_carries_across_midnight() {
        let dt = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_999_900)
            .unwrap();
        let bind = BindValue::new(dt);
        assert_eq!(
            text(&DateTimeEncoder, &bind, &EncodeContext::default()),
            "'2024-01-01 00:00:00'"
        );
    }

    #[test]
    fn negative_durations_truncate_toward_zero() {
        let ctx = no_fractions();
        let bind = BindValue::new(TimeDelta::milliseconds(-1500));
        assert_eq!(text(&DurationEncoder, &bind, &ctx), "'-00:00:01'");
        let bind = BindValue::new(TimeDelta::milliseconds(-500));
        assert_eq!(text(&DurationEncoder, &bind, &ctx), "'00:00:00'");
        let bind = BindValue::new(TimeDelta::hours(-30));
        assert_eq!(text(&DurationEncoder, &bind, &ctx), "'-30:00:00'");
    }

    #[test]
    fn binary_layouts() {
        let ctx = EncodeContext::default();
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut out = Vec::new();
        DateEncoder.encode_as_binary(&BindValue::new(date), &ctx, &mut out).unwrap();
        assert_eq!(out, vec![4, 0xE8, 0x07, 2, 29]);

        out.clear();
        let bind = BindValue::new(date).with_target(SqlType::DateTime);
        DateEncoder.encode_as_binary(&bind, &ctx, &mut out).unwrap();
        assert_eq!(out, vec![7, 0xE8, 0x07, 2, 29, 0, 0, 0]);

        out.clear();
        let bind = BindValue::new(-(TimeDelta::hours(25) + TimeDelta::microseconds(5)));
        DurationEncoder.encode_as_binary(&bind, &ctx, &mut out).unwrap();
        assert_eq!(out, vec![12, 1, 1, 0, 0, 0, 1, 0, 0, 5, 0, 0, 0]);
    }

    #[test]
    fn time_of_day_into_datetime_uses_epoch() {
        let bind = BindValue::new(NaiveTime::from_hms_opt(10, 30, 0).unwrap())
            .with_target(SqlType::DateTime);
        assert_eq!(
            text(&TimeEncoder, &bind, &EncodeContext::default()),
            "'1970-01-01 10:30:00'"
        );
    }

    #[test]
    fn year_target_and_mismatch() {
        let date = NaiveDate::from_ymd_opt(1999, 5, 1).unwrap();
        let bind = BindValue::new(date).with_target(SqlType::Year);
        assert_eq!(text(&DateEncoder, &bind, &EncodeContext::default()), "1999");

        let bind = BindValue::new(date).with_target(SqlType::Time);
        assert!(matches!(
            DateEncoder.encode_as_text(&bind, &EncodeContext::default()).unwrap_err(),
            Error::TypeMismatch { .. }
        ));
    }
}
