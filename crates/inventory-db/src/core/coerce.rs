//! Column target types and value coercion.
//!
//! Each record's cells are cast to their declared column type before any
//! SQL is generated, so malformed input surfaces as [`DbError::TypeCoercion`]
//! without touching the database.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{DbError, Result};

/// Declared target type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    /// 64-bit integer (bigint).
    Int,
    /// 64-bit float (double precision).
    Float,
    Text,
    Date,
    Timestamp,
    Numeric,
}

impl ColumnType {
    /// Human-readable type name used in coercion errors.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::Int => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Numeric => "numeric",
        }
    }

    /// NULL hint for cells of this column.
    #[must_use]
    pub fn null_type(self) -> SqlNullType {
        match self {
            ColumnType::Bool => SqlNullType::Bool,
            ColumnType::Int => SqlNullType::I64,
            ColumnType::Float => SqlNullType::F64,
            ColumnType::Text => SqlNullType::Text,
            ColumnType::Date => SqlNullType::Date,
            ColumnType::Timestamp => SqlNullType::Timestamp,
            ColumnType::Numeric => SqlNullType::Numeric,
        }
    }

    /// SQL cast suffix appended to placeholders for this column.
    #[must_use]
    pub fn cast_suffix(self) -> &'static str {
        match self {
            ColumnType::Bool => "::boolean",
            ColumnType::Int => "::bigint",
            ColumnType::Float => "::double precision",
            ColumnType::Text => "::text",
            ColumnType::Date => "::date",
            ColumnType::Timestamp => "::timestamp",
            ColumnType::Numeric => "::numeric",
        }
    }
}

/// Render a value for coercion error messages.
fn render(value: &SqlValue) -> String {
    match value {
        SqlValue::Null(_) => "NULL".to_string(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F64(n) => n.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Date(d) => d.to_string(),
        SqlValue::Timestamp(dt) => dt.to_string(),
        SqlValue::Numeric(d) => d.to_string(),
    }
}

fn fail(column: &str, value: &SqlValue, ty: ColumnType) -> DbError {
    DbError::coercion(column, render(value), ty.name())
}

/// Cast a raw cell to its declared column type.
///
/// NULL passes through retyped to the column's null hint. Numeric
/// narrowing truncates toward zero; text is parsed. Anything that cannot
/// be represented in the target type fails with [`DbError::TypeCoercion`]
/// naming the offending column.
pub fn coerce(value: &SqlValue, ty: ColumnType, column: &str) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null(ty.null_type()));
    }

    match ty {
        ColumnType::Bool => coerce_bool(value, column),
        ColumnType::Int => coerce_int(value, column),
        ColumnType::Float => coerce_float(value, column),
        ColumnType::Text => Ok(SqlValue::Text(render(value))),
        ColumnType::Date => coerce_date(value, column),
        ColumnType::Timestamp => coerce_timestamp(value, column),
        ColumnType::Numeric => coerce_numeric(value, column),
    }
}

fn coerce_bool(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::Bool(b) => *b,
        SqlValue::I32(0) | SqlValue::I64(0) => false,
        SqlValue::I32(1) | SqlValue::I64(1) => true,
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "t" | "true" => true,
            "f" | "false" => false,
            _ => return Err(fail(column, value, ColumnType::Bool)),
        },
        _ => return Err(fail(column, value, ColumnType::Bool)),
    };
    Ok(SqlValue::Bool(out))
}

fn coerce_int(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::I32(n) => i64::from(*n),
        SqlValue::I64(n) => *n,
        SqlValue::Bool(b) => i64::from(*b),
        SqlValue::F64(f) => {
            let t = f.trunc();
            if !f.is_finite() || t < i64::MIN as f64 || t > i64::MAX as f64 {
                return Err(fail(column, value, ColumnType::Int));
            }
            t as i64
        }
        SqlValue::Numeric(d) => d
            .trunc()
            .to_i64()
            .ok_or_else(|| fail(column, value, ColumnType::Int))?,
        SqlValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| fail(column, value, ColumnType::Int))?,
        _ => return Err(fail(column, value, ColumnType::Int)),
    };
    Ok(SqlValue::I64(out))
}

fn coerce_float(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::F64(f) => *f,
        SqlValue::I32(n) => f64::from(*n),
        SqlValue::I64(n) => *n as f64,
        SqlValue::Bool(b) => if *b { 1.0 } else { 0.0 },
        SqlValue::Numeric(d) => d
            .to_f64()
            .ok_or_else(|| fail(column, value, ColumnType::Float))?,
        SqlValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| fail(column, value, ColumnType::Float))?,
        _ => return Err(fail(column, value, ColumnType::Float)),
    };
    Ok(SqlValue::F64(out))
}

fn coerce_date(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::Date(d) => *d,
        SqlValue::Timestamp(dt) => dt.date(),
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| fail(column, value, ColumnType::Date))?,
        _ => return Err(fail(column, value, ColumnType::Date)),
    };
    Ok(SqlValue::Date(out))
}

fn coerce_timestamp(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::Timestamp(dt) => *dt,
        SqlValue::Date(d) => d.and_time(NaiveTime::MIN),
        SqlValue::Text(s) => parse_timestamp(s.trim())
            .ok_or_else(|| fail(column, value, ColumnType::Timestamp))?,
        _ => return Err(fail(column, value, ColumnType::Timestamp)),
    };
    Ok(SqlValue::Timestamp(out))
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn coerce_numeric(value: &SqlValue, column: &str) -> Result<SqlValue> {
    let out = match value {
        SqlValue::Numeric(d) => *d,
        SqlValue::I32(n) => Decimal::from(*n),
        SqlValue::I64(n) => Decimal::from(*n),
        SqlValue::F64(f) => {
            Decimal::from_f64(*f).ok_or_else(|| fail(column, value, ColumnType::Numeric))?
        }
        SqlValue::Text(s) => s
            .trim()
            .parse::<Decimal>()
            .map_err(|_| fail(column, value, ColumnType::Numeric))?,
        _ => return Err(fail(column, value, ColumnType::Numeric)),
    };
    Ok(SqlValue::Numeric(out))
}
