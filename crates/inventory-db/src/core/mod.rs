//! Core value and identifier types shared across the crate.

pub mod coerce;
pub mod identifier;
pub mod value;

pub use coerce::{coerce, ColumnType};
pub use identifier::{quote_ident, quote_idents, validate_identifier};
pub use value::{SqlNullType, SqlValue};
