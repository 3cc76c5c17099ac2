//! Dynamic SQL values.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const MICROS_PER_SECOND: i64 = 1_000_000;

/// A dynamically-typed SQL value.
///
/// Used for parameter binding and result fetching. Backends convert their
/// native column representation into one of these variants; the typed
/// conversions in [`crate::types`] accept the representations a backend
/// is likely to hand back (for example a SQLite date stored as text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since 1970-01-01)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp without time zone (microseconds since 1970-01-01 00:00:00)
    Timestamp(i64),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Integer view of this value, if it holds an integer or boolean.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of this value, if it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Borrow the text of this value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the bytes of this value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Build a `Date` value from a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Value::Date(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
    }

    /// Build a `Time` value from a time of day.
    pub fn from_time(time: NaiveTime) -> Self {
        let secs = i64::from(time.num_seconds_from_midnight());
        let micros = i64::from(time.nanosecond() / 1_000);
        Value::Time(secs * MICROS_PER_SECOND + micros)
    }

    /// Build a `Timestamp` value from a date and time.
    pub fn from_date_time(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts.and_utc().timestamp_micros())
    }
}

/// Convert days since 1970-01-01 into a calendar date.
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

/// Convert microseconds since midnight into a time of day.
pub fn micros_to_time(micros: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(MICROS_PER_SECOND)).ok()?;
    let nanos = u32::try_from(micros.rem_euclid(MICROS_PER_SECOND) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

/// Convert microseconds since the epoch into a date and time.
pub fn micros_to_date_time(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "[BLOB: {} bytes]", b.len()),
            Value::Date(d) => match days_to_date(*d) {
                Some(date) => write!(f, "{}", date),
                None => write!(f, "date({})", d),
            },
            Value::Time(t) => match micros_to_time(*t) {
                Some(time) => write!(f, "{}", time),
                None => write!(f, "time({})", t),
            },
            Value::Timestamp(ts) => match micros_to_date_time(*ts) {
                Some(dt) => write!(f, "{}", dt),
                None => write!(f, "timestamp({})", ts),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::from_date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::from_time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::from_date_time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_time_round_trips_through_epoch_offsets() {
        let date = NaiveDate::from_ymd_opt(2009, 10, 1).unwrap();
        let Value::Date(days) = Value::from_date(date) else {
            panic!("expected a date value");
        };
        assert_eq!(days_to_date(days), Some(date));
        assert_eq!(Value::from_date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()), Value::Date(0));

        let ts = date.and_hms_opt(12, 11, 31).unwrap();
        let Value::Timestamp(micros) = Value::from_date_time(ts) else {
            panic!("expected a timestamp value");
        };
        assert_eq!(micros_to_date_time(micros), Some(ts));

        let time = NaiveTime::from_hms_micro_opt(23, 59, 1, 250).unwrap();
        assert_eq!(Value::from_time(time), Value::Time(86_341_000_250));
        assert_eq!(micros_to_time(86_341_000_250), Some(time));
        assert_eq!(micros_to_time(-1), None);
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Int(-4).as_f64(), Some(-4.0));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::Text("abc".into()).as_bytes(), Some(&b"abc"[..]));
    }
}
