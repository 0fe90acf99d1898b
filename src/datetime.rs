//! Datetime wire codecs.
//!
//! Postgres transmits binary datetimes relative to its own epoch,
//! 2000-01-01, either as integer microseconds or as double precision
//! seconds depending on how the server was built. The active convention is
//! reported by the `integer_datetimes` session parameter during startup.
use time::{
    Date, Duration, PrimitiveDateTime, Time,
    format_description::{BorrowedFormatItem as I, Component as C, modifier},
    macros::{date, datetime},
};

use crate::value::DecodeError;

/// Binary representation of timestamps and times on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeMode {
    /// `int64` microseconds, `integer_datetimes = on`, the default since
    /// postgres 8.4.
    #[default]
    Integer,
    /// `float8` seconds, the historical convention.
    Float,
}

impl DateTimeMode {
    /// Select the mode from the `integer_datetimes` parameter value.
    pub fn from_parameter(value: &str) -> DateTimeMode {
        match value {
            "on" => DateTimeMode::Integer,
            _ => DateTimeMode::Float,
        }
    }
}

const PG_EPOCH: PrimitiveDateTime = datetime!(2000-01-01 0:00);
const PG_EPOCH_DATE: Date = date!(2000 - 01 - 01);

pub(crate) fn encode_timestamp(ts: PrimitiveDateTime, mode: DateTimeMode) -> [u8; 8] {
    let micros = (ts - PG_EPOCH).whole_microseconds() as i64;
    match mode {
        DateTimeMode::Integer => micros.to_be_bytes(),
        DateTimeMode::Float => ((micros as f64) / 1e6).to_be_bytes(),
    }
}

pub(crate) fn decode_timestamp(raw: [u8; 8], mode: DateTimeMode) -> Result<PrimitiveDateTime, DecodeError> {
    let duration = match mode {
        DateTimeMode::Integer => Duration::microseconds(i64::from_be_bytes(raw)),
        DateTimeMode::Float => Duration::seconds_f64(f64::from_be_bytes(raw)),
    };
    PG_EPOCH.checked_add(duration).ok_or(DecodeError::Invalid("timestamp"))
}

pub(crate) fn encode_date(date: Date) -> [u8; 4] {
    (date.to_julian_day() - PG_EPOCH_DATE.to_julian_day()).to_be_bytes()
}

pub(crate) fn decode_date(raw: [u8; 4]) -> Result<Date, DecodeError> {
    let days = i32::from_be_bytes(raw);
    PG_EPOCH_DATE
        .to_julian_day()
        .checked_add(days)
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .ok_or(DecodeError::Invalid("date"))
}

pub(crate) fn encode_time(time: Time, mode: DateTimeMode) -> [u8; 8] {
    let micros = (time - Time::MIDNIGHT).whole_microseconds() as i64;
    match mode {
        DateTimeMode::Integer => micros.to_be_bytes(),
        DateTimeMode::Float => ((micros as f64) / 1e6).to_be_bytes(),
    }
}

pub(crate) fn decode_time(raw: [u8; 8], mode: DateTimeMode) -> Result<Time, DecodeError> {
    let micros = match mode {
        DateTimeMode::Integer => i64::from_be_bytes(raw),
        DateTimeMode::Float => (f64::from_be_bytes(raw) * 1e6) as i64,
    };
    if !(0..86_400_000_000).contains(&micros) {
        return Err(DecodeError::Invalid("time"));
    }
    Ok(Time::MIDNIGHT + Duration::microseconds(micros))
}

// Text renderings, `2024-05-01 13:37:00.25` and friends.

const SUBSECOND: &[I<'_>] = &[
    I::Literal(b"."),
    I::Component(C::Subsecond(modifier::Subsecond::default())),
];

pub(crate) const DATE_TEXT: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
];

pub(crate) const TIME_TEXT: &[I<'_>] = &[
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Optional(&I::Compound(SUBSECOND)),
];

pub(crate) const TIMESTAMP_TEXT: &[I<'_>] = &[
    I::Component(C::Year(modifier::Year::default())),
    I::Literal(b"-"),
    I::Component(C::Month(modifier::Month::default())),
    I::Literal(b"-"),
    I::Component(C::Day(modifier::Day::default())),
    I::Literal(b" "),
    I::Component(C::Hour(modifier::Hour::default())),
    I::Literal(b":"),
    I::Component(C::Minute(modifier::Minute::default())),
    I::Literal(b":"),
    I::Component(C::Second(modifier::Second::default())),
    I::Optional(&I::Compound(SUBSECOND)),
];
