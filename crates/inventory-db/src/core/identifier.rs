//! Identifier validation and quoting.
//!
//! SQL identifiers (table and column names) cannot be passed as parameters
//! in prepared statements, only data values can. Every identifier this
//! crate interpolates into generated SQL goes through [`quote_ident`],
//! which validates the name and applies PostgreSQL double-quote escaping.

use crate::error::{DbError, Result};

/// Maximum identifier length (PostgreSQL truncates at 63 bytes).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding PostgreSQL's length limit
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DbError::invalid("identifier cannot be empty"));
    }

    if name.contains('\0') {
        return Err(DbError::invalid(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(DbError::invalid(format!(
            "identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Validates the identifier, escapes embedded double quotes by doubling
/// them, and wraps the result in double quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a list of identifiers, preserving order.
pub fn quote_idents<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    names.iter().map(|n| quote_ident(n.as_ref())).collect()
}
