//! Owned SQL values moved from source rows into staging tables.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::schema::{Column, TypeFamily};

/// Type hint for NULL values so bulk loads emit the right column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

impl SqlNullType {
    /// Null type hint for a column's type family.
    pub fn for_column(column: &Column) -> Self {
        match column.family() {
            TypeFamily::Integer => SqlNullType::I64,
            TypeFamily::Decimal => SqlNullType::Decimal,
            TypeFamily::Float => SqlNullType::F64,
            TypeFamily::Boolean => SqlNullType::Bool,
            TypeFamily::DateTime => SqlNullType::DateTime,
            TypeFamily::DateTimeOffset => SqlNullType::DateTimeOffset,
            TypeFamily::Date => SqlNullType::Date,
            TypeFamily::Time => SqlNullType::Time,
            TypeFamily::Guid => SqlNullType::Uuid,
            TypeFamily::Binary => SqlNullType::Bytes,
            TypeFamily::Text | TypeFamily::Other => SqlNullType::String,
        }
    }
}

/// SQL value with owned data.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(SqlNullType),
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Text rendering used for concatenation, duplicate keys and diagnostics.
    ///
    /// NULL renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Null(_) => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::I16(i) => i.to_string(),
            SqlValue::I32(i) => i.to_string(),
            SqlValue::I64(i) => i.to_string(),
            SqlValue::F32(f) => f.to_string(),
            SqlValue::F64(f) => f.to_string(),
            SqlValue::String(s) => s.clone(),
            SqlValue::Bytes(b) => {
                let mut out = String::with_capacity(2 + b.len() * 2);
                out.push_str("0x");
                for byte in b {
                    out.push_str(&format!("{:02X}", byte));
                }
                out
            }
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(dto) => dto.to_rfc3339(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        }
    }

    /// Best-effort conversion into the representation expected by `column`.
    ///
    /// Values that cannot be converted are returned unchanged; the bulk load
    /// then rejects the row and the failure is reported per row.
    pub fn coerce(self, column: &Column) -> SqlValue {
        if self.is_null() {
            return SqlValue::Null(SqlNullType::for_column(column));
        }

        if column.family() == TypeFamily::Text {
            return match self {
                SqlValue::String(s) => SqlValue::String(s),
                other => SqlValue::String(other.render()),
            };
        }

        let converted = match column.family() {
            TypeFamily::Text | TypeFamily::Other => None,
            TypeFamily::Integer => self.to_i64().map(SqlValue::I64),
            TypeFamily::Float => self.to_f64().map(SqlValue::F64),
            TypeFamily::Decimal => self.to_decimal().map(SqlValue::Decimal),
            TypeFamily::Boolean => self.to_bool().map(SqlValue::Bool),
            TypeFamily::DateTime => self.to_datetime().map(SqlValue::DateTime),
            TypeFamily::Date => self.to_datetime().map(|dt| SqlValue::Date(dt.date())),
            TypeFamily::Time => match &self {
                SqlValue::Time(t) => Some(SqlValue::Time(*t)),
                SqlValue::DateTime(dt) => Some(SqlValue::Time(dt.time())),
                SqlValue::String(s) => parse_time(s).map(SqlValue::Time),
                _ => None,
            },
            TypeFamily::DateTimeOffset => match &self {
                SqlValue::DateTimeOffset(dto) => Some(SqlValue::DateTimeOffset(*dto)),
                SqlValue::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(SqlValue::DateTimeOffset)
                    .or_else(|| {
                        parse_datetime(s).and_then(|dt| {
                            FixedOffset::east_opt(0)
                                .map(|utc| SqlValue::DateTimeOffset(utc.from_utc_datetime(&dt)))
                        })
                    }),
                _ => self.to_datetime().and_then(|dt| {
                    FixedOffset::east_opt(0)
                        .map(|utc| SqlValue::DateTimeOffset(utc.from_utc_datetime(&dt)))
                }),
            },
            TypeFamily::Guid => match &self {
                SqlValue::Uuid(u) => Some(SqlValue::Uuid(*u)),
                SqlValue::String(s) => Uuid::parse_str(s.trim()).ok().map(SqlValue::Uuid),
                _ => None,
            },
            TypeFamily::Binary => match &self {
                SqlValue::Bytes(b) => Some(SqlValue::Bytes(b.clone())),
                SqlValue::String(s) => Some(SqlValue::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
        };

        converted.unwrap_or(self)
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::I16(i) => Some(i64::from(*i)),
            SqlValue::I32(i) => Some(i64::from(*i)),
            SqlValue::I64(i) => Some(*i),
            SqlValue::F32(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::F64(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.trunc().to_string().parse().ok(),
            SqlValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            SqlValue::I16(i) => Some(f64::from(*i)),
            SqlValue::I32(i) => Some(f64::from(*i)),
            SqlValue::I64(i) => Some(*i as f64),
            SqlValue::F32(f) => Some(f64::from(*f)),
            SqlValue::F64(f) => Some(*f),
            SqlValue::Decimal(d) => d.to_string().parse().ok(),
            SqlValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            SqlValue::Bool(b) => Some(Decimal::from(i64::from(*b))),
            SqlValue::I16(i) => Some(Decimal::from(*i)),
            SqlValue::I32(i) => Some(Decimal::from(*i)),
            SqlValue::I64(i) => Some(Decimal::from(*i)),
            SqlValue::F32(f) => Decimal::try_from(*f).ok(),
            SqlValue::F64(f) => Decimal::try_from(*f).ok(),
            SqlValue::Decimal(d) => Some(*d),
            SqlValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::String(s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            },
            other => other.to_i64().map(|i| i != 0),
        }
    }

    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::DateTime(dt) => Some(*dt),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
            SqlValue::DateTimeOffset(dto) => Some(dto.naive_utc()),
            SqlValue::String(s) => parse_datetime(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => write!(f, "NULL"),
            other => write!(f, "{}", other.render()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::String(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::String(s)
    }
}

impl From<i32> for SqlValue {
    fn from(i: i32) -> Self {
        SqlValue::I32(i)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::I64(i)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl From<Uuid> for SqlValue {
    fn from(u: Uuid) -> Self {
        SqlValue::Uuid(u)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(dt: NaiveDateTime) -> Self {
        SqlValue::DateTime(dt)
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%Y%m%d"];

/// Parse the date and datetime spellings accepted in condition literals.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dto| dto.naive_utc()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}
