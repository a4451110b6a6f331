//! Field-wise temporal values exchanged between chrono types and wire bytes.
//!
//! Nanoseconds are always kept; they are cut to the negotiated number of
//! fractional digits only when a value is encoded.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

/// DATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InternalDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl InternalDate {
    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.month == 0 && self.day == 0
    }

    /// `None` for zero dates and other dates chrono cannot represent
    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))
    }

    /// `YYYY-MM-DD`
    pub fn to_literal(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

fn push_fraction(out: &mut String, nanos: u32, digits: u8) {
    if nanos == 0 || digits == 0 {
        return;
    }
    let all = format!("{nanos:09}");
    out.push('.');
    out.push_str(&all[..usize::from(digits.min(9))]);
}

impl From<NaiveDate> for InternalDate {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year().clamp(0, 9999) as u16,
            month: date.month() as u8,
            day: date.day() as u8,
        }
    }
}

/// TIME, which is a signed duration of up to 838 hours rather than a time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InternalTime {
    pub negative: bool,
    /// Total hours including whole days
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub nanos: u32,
}

impl InternalTime {
    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0 && self.nanos == 0
    }

    pub fn days(&self) -> u32 {
        self.hours / 24
    }

    pub fn to_duration(&self) -> TimeDelta {
        let secs = i64::from(self.hours) * 3600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds);
        let delta = TimeDelta::seconds(secs) + TimeDelta::nanoseconds(i64::from(self.nanos));
        if self.negative { -delta } else { delta }
    }

    /// `None` when the value does not fit in a single day
    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        if self.negative || self.hours >= 24 {
            return None;
        }
        NaiveTime::from_hms_nano_opt(
            self.hours,
            u32::from(self.minutes),
            u32::from(self.seconds),
            self.nanos,
        )
    }

    /// `[-]HH:MM:SS[.f]`, hours may exceed two digits
    pub fn to_literal(&self, digits: u8) -> String {
        let mut out = String::with_capacity(16);
        if self.negative && !self.is_zero() {
            out.push('-');
        }
        out.push_str(&format!(
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        ));
        push_fraction(&mut out, self.nanos, digits);
        out
    }

    /// Split a duration into fields.
    ///
    /// The magnitude is decomposed, so -1.5 s becomes negative 1 s + 500 ms.
    pub fn from_duration(delta: TimeDelta) -> Self {
        let negative = delta < TimeDelta::zero();
        let magnitude = delta.abs();
        let total = magnitude.num_seconds();
        Self {
            negative,
            hours: u32::try_from(total / 3600).unwrap_or(u32::MAX),
            minutes: ((total / 60) % 60) as u8,
            seconds: (total % 60) as u8,
            nanos: magnitude.subsec_nanos().unsigned_abs(),
        }
    }
}

impl From<NaiveTime> for InternalTime {
    fn from(time: NaiveTime) -> Self {
        Self {
            negative: false,
            hours: time.hour(),
            minutes: time.minute() as u8,
            seconds: time.second() as u8,
            // leap second representation folds into the last second
            nanos: time.nanosecond().min(999_999_999),
        }
    }
}

/// DATETIME and TIMESTAMP, optionally with a UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InternalTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanos: u32,
    /// Offset from UTC in minutes
    pub offset_minutes: Option<i16>,
}

impl InternalTimestamp {
    pub fn is_zero(&self) -> bool {
        self.year == 0
            && self.month == 0
            && self.day == 0
            && self.hour == 0
            && self.minute == 0
            && self.second == 0
            && self.nanos == 0
    }

    pub fn date(&self) -> InternalDate {
        InternalDate {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    pub fn time(&self) -> InternalTime {
        InternalTime {
            negative: false,
            hours: u32::from(self.hour),
            minutes: self.minute,
            seconds: self.second,
            nanos: self.nanos,
        }
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let date = self.date().to_naive()?;
        let time = self.time().to_naive_time()?;
        Some(NaiveDateTime::new(date, time))
    }

    /// `YYYY-MM-DD HH:MM:SS[.f]`
    pub fn to_literal(&self, digits: u8) -> String {
        let mut out = self.date().to_literal();
        out.push_str(&format!(
            " {:02}:{:02}:{:02}",
            self.hour, self.minute, self.second
        ));
        push_fraction(&mut out, self.nanos, digits);
        out
    }
}

impl From<InternalDate> for InternalTimestamp {
    fn from(date: InternalDate) -> Self {
        Self {
            year: date.year,
            month: date.month,
            day: date.day,
            ..Default::default()
        }
    }
}

impl From<NaiveDateTime> for InternalTimestamp {
    fn from(dt: NaiveDateTime) -> Self {
        let date = InternalDate::from(dt.date());
        let time = InternalTime::from(dt.time());
        Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: time.hours as u8,
            minute: time.minutes,
            second: time.seconds,
            nanos: time.nanos,
            offset_minutes: None,
        }
    }
}

/// Cut `nanos` to `digits` fractional digits.
///
/// Rounds half up unless `truncate` is set. The second flag reports a carry
/// into the next whole second.
pub fn adjust_nanos(nanos: u32, digits: u8, truncate: bool) -> (u32, bool) {
    let digits = u32::from(digits.min(9));
    let tail = 10u32.pow(9 - digits);
    let adjusted = if truncate {
        nanos / tail * tail
    } else {
        (nanos + tail / 2) / tail * tail
    };
    if adjusted >= 1_000_000_000 {
        (adjusted - 1_000_000_000, true)
    } else {
        (adjusted, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_rounds_and_truncates() {
        assert_eq!(adjust_nanos(123_456_789, 6, false), (123_457_000, false));
        assert_eq!(adjust_nanos(123_456_789, 6, true), (123_456_000, false));
        assert_eq!(adjust_nanos(999_999_999, 3, false), (0, true));
        assert_eq!(adjust_nanos(999_999_999, 0, true), (0, false));
        assert_eq!(adjust_nanos(500_000_000, 0, false), (0, true));
    }

    #[test]
    fn duration_split_uses_magnitude() {
        let t = InternalTime::from_duration(TimeDelta::milliseconds(-1500));
        assert!(t.negative);
        assert_eq!((t.hours, t.minutes, t.seconds, t.nanos), (0, 0, 1, 500_000_000));
        assert_eq!(t.to_duration(), TimeDelta::milliseconds(-1500));

        let long = InternalTime::from_duration(TimeDelta::hours(50) + TimeDelta::seconds(61));
        assert_eq!((long.hours, long.minutes, long.seconds), (50, 1, 1));
        assert_eq!(long.days(), 2);
        assert!(long.to_naive_time().is_none());
    }

    #[test]
    fn literals() {
        let ts = InternalTimestamp {
            year: 2024,
            month: 1,
            day: 2,
            hour: 3,
            minute: 4,
            second: 5,
            nanos: 120_000_000,
            offset_minutes: None,
        };
        assert_eq!(ts.to_literal(6), "2024-01-02 03:04:05.120000");
        assert_eq!(ts.to_literal(0), "2024-01-02 03:04:05");
        let t = InternalTime {
            negative: true,
            hours: 100,
            minutes: 2,
            seconds: 3,
            nanos: 0,
        };
        assert_eq!(t.to_literal(6), "-100:02:03");
    }

    #[test]
    fn zero_values() {
        assert!(InternalDate::default().is_zero());
        assert!(InternalDate::default().to_naive().is_none());
        assert!(InternalTimestamp::default().is_zero());
    }
}
