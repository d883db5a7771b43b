//! Conversions between [`SqlValue`] and tiberius wire values.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, FromSql, ToSql};
use tracing::warn;
use uuid::Uuid;

use crate::core::schema::Column;
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::Result;

/// Default fractional-second precision of datetime2, time and datetimeoffset.
const DEFAULT_TIME_SCALE: u8 = 7;

fn epoch(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn nanos_since_midnight(t: &NaiveTime) -> u64 {
    t.num_seconds_from_midnight() as u64 * 1_000_000_000 + u64::from(t.nanosecond() % 1_000_000_000)
}

fn time_scale(column: &Column) -> u8 {
    match u8::try_from(column.scale) {
        Ok(s) if (1..=7).contains(&s) => s,
        _ => DEFAULT_TIME_SCALE,
    }
}

fn tds_time(t: &NaiveTime, scale: u8) -> tiberius::time::Time {
    let increments = nanos_since_midnight(t) / 10u64.pow(9 - u32::from(scale));
    tiberius::time::Time::new(increments, scale)
}

fn tds_date(d: &NaiveDate) -> std::result::Result<tiberius::time::Date, String> {
    let days = (*d - epoch(1)).num_days();
    u32::try_from(days)
        .map(tiberius::time::Date::new)
        .map_err(|_| format!("date {} is out of range", d))
}

fn tds_datetime2(dt: &NaiveDateTime, scale: u8) -> std::result::Result<tiberius::time::DateTime2, String> {
    Ok(tiberius::time::DateTime2::new(
        tds_date(&dt.date())?,
        tds_time(&dt.time(), scale),
    ))
}

/// `datetime`: days since 1900-01-01 and 1/300 second ticks.
fn tds_datetime(dt: &NaiveDateTime) -> std::result::Result<tiberius::time::DateTime, String> {
    let days = i32::try_from((dt.date() - epoch(1900)).num_days())
        .map_err(|_| format!("datetime {} is out of range", dt))?;
    let ticks = (nanos_since_midnight(&dt.time()) * 3 / 10_000_000) as u32;
    Ok(tiberius::time::DateTime::new(days, ticks))
}

/// `smalldatetime`: days since 1900-01-01 and minutes since midnight.
fn tds_smalldatetime(dt: &NaiveDateTime) -> std::result::Result<tiberius::time::SmallDateTime, String> {
    let days = u16::try_from((dt.date() - epoch(1900)).num_days())
        .map_err(|_| format!("smalldatetime {} is out of range", dt))?;
    let minutes = (dt.time().num_seconds_from_midnight() / 60) as u16;
    Ok(tiberius::time::SmallDateTime::new(days, minutes))
}

fn null_for(column: &Column) -> ColumnData<'static> {
    match column.data_type.to_lowercase().as_str() {
        "tinyint" => ColumnData::U8(None),
        "smallint" => ColumnData::I16(None),
        "int" => ColumnData::I32(None),
        "bigint" => ColumnData::I64(None),
        "bit" => ColumnData::Bit(None),
        "real" => ColumnData::F32(None),
        "float" => ColumnData::F64(None),
        "decimal" | "numeric" | "money" | "smallmoney" => ColumnData::Numeric(None),
        "date" => ColumnData::Date(None),
        "datetime" => ColumnData::DateTime(None),
        "smalldatetime" => ColumnData::SmallDateTime(None),
        "datetime2" => ColumnData::DateTime2(None),
        "datetimeoffset" => ColumnData::DateTimeOffset(None),
        "time" => ColumnData::Time(None),
        "uniqueidentifier" => ColumnData::Guid(None),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => ColumnData::Binary(None),
        _ => ColumnData::String(None),
    }
}

fn mismatch(value: &SqlValue, column: &Column) -> String {
    format!(
        "value '{}' cannot be converted to {} for column {}",
        value.render(),
        column.data_type,
        column.name
    )
}

/// Bulk load value for `column`, narrowed to the column's wire type.
///
/// Values that do not fit the column come back as an error message so the
/// row can be reported as rejected without sending it.
pub fn to_column_data(value: &SqlValue, column: &Column) -> std::result::Result<ColumnData<'static>, String> {
    if value.is_null() {
        return Ok(null_for(column));
    }
    let data_type = column.data_type.to_lowercase();

    let data = match data_type.as_str() {
        "tinyint" | "smallint" | "int" | "bigint" => {
            let i = value.to_i64().ok_or_else(|| mismatch(value, column))?;
            let out_of_range = || format!("value {} is out of range for {} column {}", i, data_type, column.name);
            match data_type.as_str() {
                "tinyint" => ColumnData::U8(Some(u8::try_from(i).map_err(|_| out_of_range())?)),
                "smallint" => ColumnData::I16(Some(i16::try_from(i).map_err(|_| out_of_range())?)),
                "int" => ColumnData::I32(Some(i32::try_from(i).map_err(|_| out_of_range())?)),
                _ => ColumnData::I64(Some(i)),
            }
        }
        "bit" => ColumnData::Bit(Some(value.to_bool().ok_or_else(|| mismatch(value, column))?)),
        "real" | "float" => {
            let f = value.to_f64().ok_or_else(|| mismatch(value, column))?;
            if !f.is_finite() {
                warn!("Converting non-finite float to NULL for column {}", column.name);
                return Ok(null_for(column));
            }
            if data_type == "real" {
                ColumnData::F32(Some(f as f32))
            } else {
                ColumnData::F64(Some(f))
            }
        }
        "decimal" | "numeric" | "money" | "smallmoney" => {
            let mut d = value.to_decimal().ok_or_else(|| mismatch(value, column))?;
            d.rescale(u32::try_from(column.scale.max(0)).unwrap_or(0));
            ColumnData::Numeric(Some(Numeric::new_with_scale(d.mantissa(), d.scale() as u8)))
        }
        "date" => {
            let dt = value.to_datetime().ok_or_else(|| mismatch(value, column))?;
            ColumnData::Date(Some(tds_date(&dt.date())?))
        }
        "datetime" => {
            let dt = value.to_datetime().ok_or_else(|| mismatch(value, column))?;
            ColumnData::DateTime(Some(tds_datetime(&dt)?))
        }
        "smalldatetime" => {
            let dt = value.to_datetime().ok_or_else(|| mismatch(value, column))?;
            ColumnData::SmallDateTime(Some(tds_smalldatetime(&dt)?))
        }
        "datetime2" => {
            let dt = value.to_datetime().ok_or_else(|| mismatch(value, column))?;
            ColumnData::DateTime2(Some(tds_datetime2(&dt, time_scale(column))?))
        }
        "datetimeoffset" => match value {
            SqlValue::DateTimeOffset(dto) => {
                let utc = tds_datetime2(&dto.naive_utc(), time_scale(column))?;
                let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
                ColumnData::DateTimeOffset(Some(tiberius::time::DateTimeOffset::new(utc, offset_minutes)))
            }
            other => return Err(mismatch(other, column)),
        },
        "time" => match value {
            SqlValue::Time(t) => ColumnData::Time(Some(tds_time(t, time_scale(column)))),
            other => return Err(mismatch(other, column)),
        },
        "uniqueidentifier" => match value {
            SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
            other => return Err(mismatch(other, column)),
        },
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => match value {
            SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b.clone()))),
            other => return Err(mismatch(other, column)),
        },
        _ => match value {
            SqlValue::String(s) => ColumnData::String(Some(Cow::Owned(s.clone()))),
            other => ColumnData::String(Some(Cow::Owned(other.render()))),
        },
    };
    Ok(data)
}

/// Statement parameter for a value; NULLs keep their type so the server
/// does not have to convert from nvarchar.
pub fn to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::I16 => Box::new(Option::<i16>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => Box::new(Option::<Uuid>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
            SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
            SqlNullType::Date => Box::new(Option::<NaiveDate>::None),
            SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::String(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}

/// Owned value from a result column.
pub fn from_column_data(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::U8(v) => v
            .map(|v| SqlValue::I16(i16::from(v)))
            .unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I16(v) => v.map(SqlValue::I16).unwrap_or(SqlValue::Null(SqlNullType::I16)),
        ColumnData::I32(v) => v.map(SqlValue::I32).unwrap_or(SqlValue::Null(SqlNullType::I32)),
        ColumnData::I64(v) => v.map(SqlValue::I64).unwrap_or(SqlValue::Null(SqlNullType::I64)),
        ColumnData::F32(v) => v.map(SqlValue::F32).unwrap_or(SqlValue::Null(SqlNullType::F32)),
        ColumnData::F64(v) => v.map(SqlValue::F64).unwrap_or(SqlValue::Null(SqlNullType::F64)),
        ColumnData::Bit(v) => v.map(SqlValue::Bool).unwrap_or(SqlValue::Null(SqlNullType::Bool)),
        ColumnData::String(v) => v
            .map(|s| SqlValue::String(s.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid).unwrap_or(SqlValue::Null(SqlNullType::Uuid)),
        ColumnData::Binary(v) => v
            .map(|b| SqlValue::Bytes(b.into_owned()))
            .unwrap_or(SqlValue::Null(SqlNullType::Bytes)),
        ColumnData::Xml(v) => v
            .map(|x| SqlValue::String(x.into_owned().into_string()))
            .unwrap_or(SqlValue::Null(SqlNullType::String)),
        data @ ColumnData::Numeric(_) => Decimal::from_sql(&data)?
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null(SqlNullType::Decimal)),
        data @ (ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_)) => {
            NaiveDateTime::from_sql(&data)?
                .map(SqlValue::DateTime)
                .unwrap_or(SqlValue::Null(SqlNullType::DateTime))
        }
        data @ ColumnData::Date(_) => NaiveDate::from_sql(&data)?
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null(SqlNullType::Date)),
        data @ ColumnData::Time(_) => NaiveTime::from_sql(&data)?
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null(SqlNullType::Time)),
        data @ ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(&data)?
            .map(SqlValue::DateTimeOffset)
            .unwrap_or(SqlValue::Null(SqlNullType::DateTimeOffset)),
    };
    Ok(value)
}
