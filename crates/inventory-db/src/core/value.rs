//! SQL value types for row batches.
//!
//! Values are transmitted to PostgreSQL as text and converted server-side
//! via explicit cast suffixes appended to the generated placeholders, so
//! generated statements never depend on client-side parameter type
//! inference.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tokio_postgres::types::ToSql;

/// Type hint for NULL values so generated SQL can carry the correct cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I32,
    I64,
    F64,
    Text,
    Date,
    Timestamp,
    Numeric,
}

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with type hint for cast generation.
    Null(SqlNullType),

    /// Boolean value.
    Bool(bool),

    /// 32-bit signed integer (integer).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 64-bit floating point (double precision).
    F64(f64),

    /// Text data.
    Text(String),

    /// Date without time component.
    Date(NaiveDate),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Decimal value with arbitrary precision.
    Numeric(Decimal),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::Text,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Timestamp(_) => SqlNullType::Timestamp,
            SqlValue::Numeric(_) => SqlNullType::Numeric,
        }
    }

    /// Get the SQL cast suffix for this value's type.
    #[must_use]
    pub fn cast_suffix(&self) -> &'static str {
        match self.null_type() {
            SqlNullType::Bool => "::boolean",
            SqlNullType::I32 => "::integer",
            SqlNullType::I64 => "::bigint",
            SqlNullType::F64 => "::double precision",
            SqlNullType::Text => "::text",
            SqlNullType::Date => "::date",
            SqlNullType::Timestamp => "::timestamp",
            SqlNullType::Numeric => "::numeric",
        }
    }

    /// Convert to a boxed wire parameter.
    ///
    /// All values are bound as text; the cast suffix in the generated SQL
    /// makes the server perform the final conversion.
    pub(crate) fn to_param(&self) -> Box<dyn ToSql + Sync + Send> {
        match self {
            SqlValue::Null(_) => Box::new(None::<String>),
            SqlValue::Bool(b) => Box::new(if *b { "t".to_string() } else { "f".to_string() }),
            SqlValue::I32(n) => Box::new(n.to_string()),
            SqlValue::I64(n) => Box::new(n.to_string()),
            SqlValue::F64(n) => Box::new(n.to_string()),
            SqlValue::Text(s) => Box::new(s.clone()),
            SqlValue::Date(d) => Box::new(d.to_string()),
            SqlValue::Timestamp(dt) => Box::new(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            SqlValue::Numeric(d) => Box::new(d.to_string()),
        }
    }
}

/// Convert a slice of values into boxed wire parameters.
pub(crate) fn to_params(values: &[SqlValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    values.iter().map(SqlValue::to_param).collect()
}

/// Borrow boxed parameters as the reference slice the driver expects.
pub(crate) fn param_refs(params: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Numeric(v)
    }
}
