//! SQL type definitions and the Rust-to-SQL value mapping.
//!
//! A type can be used as a mapped field when it implements [`SqlValue`]:
//! it knows its SQL type, how to turn itself into a [`Value`] for binding,
//! and how to read itself back from a result column.

use crate::error::{Error, Result, TypeError};
use crate::value::{Value, days_to_date, micros_to_date_time, micros_to_time};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// SQL data types a mapped field can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Text; a field size turns this into `varchar(n)` where the dialect supports it.
    Text,
    Blob,
    Date,
    Time,
    DateTime,
}

/// The three temporal kinds a dialect must name a column type for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeKind {
    Date,
    Time,
    DateTime,
}

impl SqlType {
    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt | SqlType::Integer | SqlType::BigInt | SqlType::Real | SqlType::Double
        )
    }

    /// The temporal kind of this type, if it is one.
    pub const fn date_time_kind(&self) -> Option<DateTimeKind> {
        match self {
            SqlType::Date => Some(DateTimeKind::Date),
            SqlType::Time => Some(DateTimeKind::Time),
            SqlType::DateTime => Some(DateTimeKind::DateTime),
            _ => None,
        }
    }
}

/// Trait for types that have a corresponding SQL type.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

/// Conversion from a column value.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

/// A Rust type that can be stored in a single column.
pub trait SqlValue: TypeInfo + FromValue + Clone + 'static {
    /// The value to bind for this field.
    fn to_value(&self) -> Value;
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
        rust_type: Some(expected),
    })
}

impl TypeInfo for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => other
                .as_i64()
                .map(|v| v != 0)
                .ok_or_else(|| type_error("bool", value)),
        }
    }
}

macro_rules! impl_integer {
    ($ty:ty, $sql:expr, $name:literal) => {
        impl TypeInfo for $ty {
            const SQL_TYPE: SqlType = $sql;
        }

        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                value
                    .as_i64()
                    .and_then(|v| <$ty>::try_from(v).ok())
                    .ok_or_else(|| type_error($name, value))
            }
        }
    };
}

impl_integer!(i16, SqlType::SmallInt, "i16");
impl_integer!(i32, SqlType::Integer, "i32");
impl_integer!(i64, SqlType::BigInt, "i64");

impl TypeInfo for f32 {
    const SQL_TYPE: SqlType = SqlType::Real;
}

impl FromValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| type_error("f32", value)),
        }
    }
}

impl TypeInfo for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_error("f64", value))
    }
}

impl TypeInfo for String {
    const SQL_TYPE: SqlType = SqlType::Text;
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| type_error("String", value)),
            Value::Null => Err(type_error("String", value)),
            other => Ok(other.to_string()),
        }
    }
}

impl TypeInfo for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| type_error("Vec<u8>", value))
    }
}

const DATE_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

impl TypeInfo for NaiveDateTime {
    const SQL_TYPE: SqlType = SqlType::DateTime;
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::Timestamp(ts) => micros_to_date_time(*ts),
            Value::Date(d) => days_to_date(*d).and_then(|d| d.and_hms_opt(0, 0, 0)),
            Value::Text(s) => DATE_TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                }),
            _ => None,
        };
        parsed.ok_or_else(|| type_error("NaiveDateTime", value))
    }
}

impl TypeInfo for NaiveDate {
    const SQL_TYPE: SqlType = SqlType::Date;
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::Date(d) => days_to_date(*d),
            Value::Timestamp(ts) => micros_to_date_time(*ts).map(|dt| dt.date()),
            Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
            _ => None,
        };
        parsed.ok_or_else(|| type_error("NaiveDate", value))
    }
}

impl TypeInfo for NaiveTime {
    const SQL_TYPE: SqlType = SqlType::Time;
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::Time(t) => micros_to_time(*t),
            Value::BigInt(t) => micros_to_time(*t),
            Value::Int(t) => micros_to_time(i64::from(*t)),
            Value::Text(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok(),
            _ => None,
        };
        parsed.ok_or_else(|| type_error("NaiveTime", value))
    }
}

macro_rules! impl_sql_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SqlValue for $ty {
                fn to_value(&self) -> Value {
                    Value::from(self.clone())
                }
            }
        )*
    };
}

impl_sql_value!(
    bool,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    Vec<u8>,
    NaiveDate,
    NaiveTime,
    NaiveDateTime
);

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: SqlValue> SqlValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}
