//! Bulk row insertion.
//!
//! Two modes over the same preflighted batch:
//!
//! - [`insert_rows`]: fire-and-forget multi-row inserts; records that
//!   collide with an existing primary/unique key are silently skipped.
//! - [`insert_rows_returning_ids`]: per-record upsert that forces the
//!   database to report an identifier for every record, new or
//!   pre-existing, via a `RETURNING` clause.
//!
//! All caller-input validation and type coercion happens before any
//! database work, so malformed batches never cause partial writes.

use tracing::{debug, warn};

use crate::core::coerce::{coerce, ColumnType};
use crate::core::identifier::{quote_ident, quote_idents};
use crate::core::value::SqlValue;
use crate::error::{DbError, Result};
use crate::session::{DbSession, Fetch};

/// Maximum rows per generated INSERT statement.
const MAX_ROWS_PER_INSERT: usize = 1000;

/// Maximum bound parameters per generated INSERT statement.
const MAX_PARAMS_PER_INSERT: usize = 32000;

/// An ordered batch of records with a fixed field count.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    /// Create a batch from rows. Field-count consistency is checked at
    /// insert time against the declared [`ColumnSpec`].
    pub fn new(rows: Vec<Vec<SqlValue>>) -> Self {
        Self { rows }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The records.
    #[must_use]
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }
}

/// Parallel column names and target types for a batch.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub names: Vec<String>,
    pub types: Vec<ColumnType>,
}

impl ColumnSpec {
    pub fn new<S: Into<String>>(names: Vec<S>, types: Vec<ColumnType>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            types,
        }
    }
}

/// Tuning knobs for bulk insertion.
#[derive(Debug, Clone)]
pub struct InsertOptions {
    /// Commit whenever this many rows have accumulated since the last
    /// commit. A final commit always follows the last row regardless.
    pub commit_interval: usize,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            commit_interval: 1_000_000,
        }
    }
}

/// A batch's coerced rows paired with the identifier assigned to each
/// record, in input order.
#[derive(Debug, Clone)]
pub struct IdAssignment {
    pub rows: Vec<Vec<SqlValue>>,
    pub ids: Vec<i64>,
}

/// Validate the batch against its column spec and coerce every cell.
///
/// Runs entirely client-side; the returned rows are what will be written.
fn preflight(batch: &RowBatch, spec: &ColumnSpec, table: &str) -> Result<Vec<Vec<SqlValue>>> {
    let width = match batch.rows.first() {
        Some(row) => row.len(),
        None => {
            // Nothing to insert; only require a self-consistent spec.
            if spec.names.len() != spec.types.len() {
                return Err(DbError::invalid(format!(
                    "number of column names ({}) does not match number of column types ({})",
                    spec.names.len(),
                    spec.types.len()
                )));
            }
            return Ok(Vec::new());
        }
    };

    if spec.names.len() != width {
        return Err(DbError::invalid(format!(
            "number of column names ({}) does not match the record field count ({})",
            spec.names.len(),
            width
        )));
    }
    if spec.types.len() != width {
        return Err(DbError::invalid(format!(
            "number of column types ({}) does not match the record field count ({})",
            spec.types.len(),
            width
        )));
    }
    if width == 0 {
        return Err(DbError::invalid("cannot insert records with zero fields"));
    }
    for (i, row) in batch.rows.iter().enumerate() {
        if row.len() != width {
            return Err(DbError::invalid(format!(
                "record {} has {} fields, expected {}",
                i,
                row.len(),
                width
            )));
        }
    }

    if batch
        .rows
        .iter()
        .any(|row| row.iter().any(SqlValue::is_null))
    {
        warn!("null values present in batch for table {}", table);
    }

    batch
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .zip(spec.types.iter())
                .zip(spec.names.iter())
                .map(|((value, ty), name)| coerce(value, *ty, name))
                .collect()
        })
        .collect()
}

/// Rows per generated statement, clamped by the bind-parameter limit.
fn rows_per_statement(column_count: usize) -> usize {
    (MAX_PARAMS_PER_INSERT / column_count)
        .min(MAX_ROWS_PER_INSERT)
        .max(1)
}

/// Insert a batch, silently skipping records that conflict with an
/// existing key. Returns the number of records offered to the database.
///
/// Work is committed every [`InsertOptions::commit_interval`] rows and
/// once more after the final chunk. A database error aborts the current
/// transaction only; rows committed at earlier interval boundaries stay
/// committed.
pub async fn insert_rows(
    session: &mut DbSession,
    table: &str,
    batch: &RowBatch,
    spec: &ColumnSpec,
    opts: &InsertOptions,
) -> Result<u64> {
    let coerced = preflight(batch, spec, table)?;
    let table_q = quote_ident(table)?;
    let cols_q = quote_idents(&spec.names)?;

    if coerced.is_empty() {
        return Ok(0);
    }

    let per_stmt = rows_per_statement(spec.types.len());
    let mut offered = 0u64;
    let mut since_commit = 0usize;

    for chunk in coerced.chunks(per_stmt) {
        let sql = build_insert_sql(&table_q, &cols_q, &spec.types, chunk.len());
        let flat: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
        session.run(&sql, &flat, Fetch::None, false).await?;

        offered += chunk.len() as u64;
        since_commit += chunk.len();
        if since_commit >= opts.commit_interval {
            session.commit().await?;
            since_commit = 0;
        }
    }
    session.commit().await?;

    debug!("offered {} rows to {}", offered, table);
    Ok(offered)
}

/// Upsert a batch and return one identifier per record, in input order.
///
/// On a unique-key conflict the statement performs a no-op update of the
/// first unique column against itself, which makes the database report
/// the existing row's identifier through the `RETURNING` clause. Commit
/// discipline matches [`insert_rows`].
pub async fn insert_rows_returning_ids(
    session: &mut DbSession,
    table: &str,
    batch: &RowBatch,
    spec: &ColumnSpec,
    unique_columns: &[&str],
    id_column: &str,
    opts: &InsertOptions,
) -> Result<IdAssignment> {
    if unique_columns.is_empty() {
        return Err(DbError::invalid(
            "unique_columns must be provided when returning ids",
        ));
    }

    let coerced = preflight(batch, spec, table)?;
    let table_q = quote_ident(table)?;
    let cols_q = quote_idents(&spec.names)?;
    let uniq_q = quote_idents(unique_columns)?;
    let id_q = quote_ident(id_column)?;

    if coerced.is_empty() {
        return Ok(IdAssignment {
            rows: Vec::new(),
            ids: Vec::new(),
        });
    }

    let sql = build_upsert_returning_sql(&table_q, &cols_q, &spec.types, &uniq_q, &id_q);

    let mut ids = Vec::with_capacity(coerced.len());
    let interval = opts.commit_interval.max(1);
    for slice in coerced.chunks(interval) {
        let rows = session.run_many(&sql, slice, true, false, true).await?;
        if rows.len() != slice.len() {
            return Err(DbError::invalid(format!(
                "upsert into {} yielded {} identifiers for {} records",
                table,
                rows.len(),
                slice.len()
            )));
        }
        for row in rows {
            ids.push(row.try_get::<_, i64>(0)?);
        }
    }

    debug!("assigned {} identifiers from {}", ids.len(), table);
    Ok(IdAssignment { rows: coerced, ids })
}

/// Build one chunk's multi-row insert statement.
fn build_insert_sql(
    table_q: &str,
    cols_q: &[String],
    types: &[ColumnType],
    row_count: usize,
) -> String {
    let mut idx = 1;
    let mut value_rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let placeholders: Vec<String> = types
            .iter()
            .map(|ty| {
                let p = format!("${}{}", idx, ty.cast_suffix());
                idx += 1;
                p
            })
            .collect();
        value_rows.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
        table_q,
        cols_q.join(", "),
        value_rows.join(", ")
    )
}

/// Build the per-record upsert statement with an id-returning clause.
fn build_upsert_returning_sql(
    table_q: &str,
    cols_q: &[String],
    types: &[ColumnType],
    uniq_q: &[String],
    id_q: &str,
) -> String {
    let placeholders: Vec<String> = types
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("${}{}", i + 1, ty.cast_suffix()))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {} = EXCLUDED.{} RETURNING {}::bigint",
        table_q,
        cols_q.join(", "),
        placeholders.join(", "),
        uniq_q.join(", "),
        uniq_q[0],
        uniq_q[0],
        id_q
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_session() -> DbSession {
        DbSession::new("host=unreachable.invalid dbname=x user=x password=x")
    }

    fn spec_ii() -> ColumnSpec {
        ColumnSpec::new(vec!["skuID", "qty"], vec![ColumnType::Int, ColumnType::Int])
    }

    // =========================================================================
    // Preflight validation (no database work)
    // =========================================================================

    #[tokio::test]
    async fn test_name_count_mismatch_before_any_query() {
        let mut session = closed_session();
        let batch = RowBatch::new(vec![vec![SqlValue::I64(1)]]);
        let err = insert_rows(
            &mut session,
            "sku",
            &batch,
            &spec_ii(),
            &InsertOptions::default(),
        )
        .await
        .unwrap_err();
        match err {
            DbError::InvalidArgument(msg) => assert!(msg.contains("column names")),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_type_count_mismatch_before_any_query() {
        let mut session = closed_session();
        let batch = RowBatch::new(vec![vec![SqlValue::I64(1), SqlValue::I64(2)]]);
        let spec = ColumnSpec::new(vec!["skuID", "qty"], vec![ColumnType::Int]);
        let err = insert_rows(&mut session, "sku", &batch, &spec, &InsertOptions::default())
            .await
            .unwrap_err();
        match err {
            DbError::InvalidArgument(msg) => assert!(msg.contains("column types")),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_ragged_batch_rejected() {
        let mut session = closed_session();
        let batch = RowBatch::new(vec![
            vec![SqlValue::I64(1), SqlValue::I64(2)],
            vec![SqlValue::I64(3)],
        ]);
        let err = insert_rows(
            &mut session,
            "sku",
            &batch,
            &spec_ii(),
            &InsertOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_coercion_failure_before_any_query() {
        let mut session = closed_session();
        let batch = RowBatch::new(vec![vec![SqlValue::Text("abc".into()), SqlValue::I64(2)]]);
        let err = insert_rows(
            &mut session,
            "sku",
            &batch,
            &spec_ii(),
            &InsertOptions::default(),
        )
        .await
        .unwrap_err();
        match err {
            DbError::TypeCoercion { column, .. } => assert_eq!(column, "skuID"),
            other => panic!("expected TypeCoercion, got {:?}", other),
        }
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_returning_ids_requires_unique_columns() {
        let mut session = closed_session();
        let batch = RowBatch::new(vec![vec![SqlValue::I64(1), SqlValue::I64(2)]]);
        let err = insert_rows_returning_ids(
            &mut session,
            "sku",
            &batch,
            &spec_ii(),
            &[],
            "ID",
            &InsertOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let mut session = closed_session();
        let inserted = insert_rows(
            &mut session,
            "sku",
            &RowBatch::default(),
            &spec_ii(),
            &InsertOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(inserted, 0);
        assert!(!session.is_open());
    }

    // =========================================================================
    // Statement construction
    // =========================================================================

    #[test]
    fn test_build_insert_sql() {
        let sql = build_insert_sql(
            "\"sku\"",
            &["\"name\"".to_string(), "\"qty\"".to_string()],
            &[ColumnType::Text, ColumnType::Int],
            2,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"sku\" (\"name\", \"qty\") \
             VALUES ($1::text, $2::bigint), ($3::text, $4::bigint) \
             ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_build_upsert_returning_sql() {
        let sql = build_upsert_returning_sql(
            "\"sku\"",
            &["\"name\"".to_string(), "\"qty\"".to_string()],
            &[ColumnType::Text, ColumnType::Int],
            &["\"name\"".to_string()],
            "\"ID\"",
        );
        assert_eq!(
            sql,
            "INSERT INTO \"sku\" (\"name\", \"qty\") VALUES ($1::text, $2::bigint) \
             ON CONFLICT (\"name\") DO UPDATE SET \"name\" = EXCLUDED.\"name\" \
             RETURNING \"ID\"::bigint"
        );
    }

    // =========================================================================
    // Chunk clamping
    // =========================================================================

    #[test]
    fn test_rows_per_statement_clamps() {
        // Few columns: limited by the row cap.
        assert_eq!(rows_per_statement(2), MAX_ROWS_PER_INSERT);
        // Many columns: limited by the bind-parameter limit.
        assert_eq!(rows_per_statement(64), MAX_PARAMS_PER_INSERT / 64);
        // Degenerate width still makes progress.
        assert_eq!(rows_per_statement(40_000), 1);
    }
}
