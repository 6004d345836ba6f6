//! Single-connection session management.
//!
//! [`DbSession`] owns at most one PostgreSQL connection and exposes the
//! execution primitives the rest of the crate builds on: single queries,
//! repeated/batch execution, and bulk ID lookups. Transactions are managed
//! explicitly (`BEGIN` on first use, `COMMIT`/`ROLLBACK` on demand) unless
//! the session is switched to auto-commit.
//!
//! A session must not be shared across concurrent callers; all methods
//! take `&mut self` and there is no internal synchronization.

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};

use crate::config::PostgresCredentials;
use crate::core::identifier::{quote_ident, quote_idents, validate_identifier};
use crate::core::value::{param_refs, to_params, SqlValue};
use crate::error::{DbError, Result};

/// Rows per generated lookup query in [`DbSession::fetch_ids_bulk`].
/// Bounds statement size for large candidate sets.
const ID_LOOKUP_CHUNK: usize = 100;

/// What to fetch after executing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Execute only; discard any result rows.
    None,
    /// Fetch the first result row, if any.
    One,
    /// Fetch all result rows.
    All,
}

/// Result of [`DbSession::run`], shaped by the requested [`Fetch`] mode.
#[derive(Debug)]
pub enum Fetched {
    None,
    One(Option<Row>),
    All(Vec<Row>),
}

impl Fetched {
    /// The single fetched row, if one was requested and present.
    pub fn into_one(self) -> Option<Row> {
        match self {
            Fetched::One(row) => row,
            _ => None,
        }
    }

    /// All fetched rows; a fetched single row yields a one-element vec.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Fetched::All(rows) => rows,
            Fetched::One(Some(row)) => vec![row],
            _ => Vec::new(),
        }
    }
}

struct OpenConn {
    client: tokio_postgres::Client,
    driver: JoinHandle<()>,
    in_txn: bool,
}

/// A session that owns a single database connection.
///
/// The connection is opened lazily on first use and released
/// deterministically by [`close`](DbSession::close) or
/// [`scope`](DbSession::scope), including on error paths.
pub struct DbSession {
    conn_str: String,
    autocommit: bool,
    conn: Option<OpenConn>,
}

impl DbSession {
    /// Create a closed session from a tokio-postgres connection string.
    ///
    /// No I/O happens until the first statement or an explicit
    /// [`open`](DbSession::open).
    pub fn new(conn_str: impl Into<String>) -> Self {
        Self {
            conn_str: conn_str.into(),
            autocommit: false,
            conn: None,
        }
    }

    /// Create a closed session from loaded credentials.
    pub fn from_credentials(creds: &PostgresCredentials) -> Self {
        Self::new(creds.connection_string())
    }

    /// Switch auto-commit on or off (default: off, transactions managed).
    #[must_use]
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Whether the connection is currently established.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Establish the connection if not already open. Idempotent.
    pub async fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let (client, connection) = tokio_postgres::connect(&self.conn_str, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("connection task ended with error: {}", e);
            }
        });
        debug!("database connection opened");

        self.conn = Some(OpenConn {
            client,
            driver,
            in_txn: false,
        });
        Ok(())
    }

    /// Release the connection. Idempotent; safe to call when closed.
    ///
    /// An open managed transaction is discarded (the server rolls back on
    /// disconnect). Use [`scope`](DbSession::scope) or an explicit
    /// [`commit`](DbSession::commit) when pending work must survive.
    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.client);
            conn.driver.abort();
            let _ = conn.driver.await;
            debug!("database connection closed");
        }
    }

    /// Commit the current managed transaction, if one is open.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            if conn.in_txn {
                conn.client.batch_execute("COMMIT").await?;
                conn.in_txn = false;
            }
        }
        Ok(())
    }

    /// Roll back the current managed transaction, if one is open.
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.as_mut() {
            if conn.in_txn {
                conn.client.batch_execute("ROLLBACK").await?;
                conn.in_txn = false;
            }
        }
        Ok(())
    }

    /// Scoped use: open on entry, release on exit on all paths.
    ///
    /// On a clean exit pending work is committed (unless the session is in
    /// auto-commit mode); on error it is rolled back. Either way the
    /// connection is closed before this returns.
    ///
    /// ```no_run
    /// # use inventory_db::{DbSession, Fetch};
    /// # async fn demo() -> inventory_db::Result<()> {
    /// let mut session = DbSession::new("host=localhost dbname=inventory user=p password=s");
    /// session
    ///     .scope(|s| {
    ///         Box::pin(async move {
    ///             s.run("DELETE FROM staging", &[], Fetch::None, false).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scope<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut DbSession) -> BoxFuture<'a, Result<T>>,
    {
        self.open().await?;
        match f(self).await {
            Ok(value) => {
                if !self.autocommit {
                    self.commit().await?;
                }
                self.close().await;
                Ok(value)
            }
            Err(e) => {
                // Best effort; the close below discards the transaction anyway.
                let _ = self.rollback().await;
                self.close().await;
                Err(e)
            }
        }
    }

    /// Execute one statement, optionally fetching rows and committing.
    ///
    /// Opens the connection lazily and begins a managed transaction when
    /// needed. Parameters are transmitted as text; SQL supplied by the
    /// caller should carry explicit `::type` casts on placeholders whose
    /// type the server cannot infer as text.
    pub async fn run(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        fetch: Fetch,
        commit: bool,
    ) -> Result<Fetched> {
        self.open().await?;
        self.begin_if_needed().await?;

        let boxed = to_params(params);
        let result = {
            let conn = self.conn_ref()?;
            let refs = param_refs(&boxed);
            match fetch {
                Fetch::None => {
                    conn.client.execute(sql, &refs).await?;
                    Fetched::None
                }
                Fetch::One => {
                    let rows = conn.client.query(sql, &refs).await?;
                    Fetched::One(rows.into_iter().next())
                }
                Fetch::All => Fetched::All(conn.client.query(sql, &refs).await?),
            }
        };

        if commit {
            self.commit().await?;
        }
        Ok(result)
    }

    /// Execute one statement once per parameter tuple.
    ///
    /// Two supported shapes:
    /// - `fetch_rows`: each execution's first result row is collected, in
    ///   input order (executions yielding no row contribute nothing);
    /// - `batch`: plain repeated execution with no row collection.
    ///
    /// Requesting both shapes, or neither, fails with `InvalidArgument`
    /// before any connection work.
    pub async fn run_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
        fetch_rows: bool,
        batch: bool,
        commit: bool,
    ) -> Result<Vec<Row>> {
        if fetch_rows && batch {
            return Err(DbError::invalid(
                "conflicting flags: fetch_rows and batch cannot both be set",
            ));
        }
        if !fetch_rows && !batch {
            return Err(DbError::invalid(
                "non-batch execution requires fetch_rows",
            ));
        }

        self.open().await?;
        self.begin_if_needed().await?;

        let mut collected = Vec::new();
        {
            let conn = self.conn_ref()?;
            let stmt = conn.client.prepare(sql).await?;
            for params in param_sets {
                let boxed = to_params(params);
                let refs = param_refs(&boxed);
                if fetch_rows {
                    let rows = conn.client.query(&stmt, &refs).await?;
                    if let Some(first) = rows.into_iter().next() {
                        collected.push(first);
                    }
                } else {
                    conn.client.execute(&stmt, &refs).await?;
                }
            }
        }

        if commit {
            self.commit().await?;
        }
        Ok(collected)
    }

    /// Look up identifier values for a set of candidate rows in bulk.
    ///
    /// Joins an inline constant table of the candidate rows against
    /// `table` on equality of `lookup_columns`, projecting `id_columns`
    /// coerced to `bigint`. Candidates are processed in fixed-size chunks
    /// to bound query size.
    ///
    /// Returns one id tuple per match, in match order. Unmatched
    /// candidates are dropped, so the result has no positional
    /// correspondence with the input.
    pub async fn fetch_ids_bulk(
        &mut self,
        table: &str,
        id_columns: &[&str],
        lookup_columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<Vec<Vec<i64>>> {
        if id_columns.is_empty() {
            return Err(DbError::invalid("id_columns must not be empty"));
        }
        if lookup_columns.is_empty() {
            return Err(DbError::invalid("lookup_columns must not be empty"));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != lookup_columns.len() {
                return Err(DbError::invalid(format!(
                    "row {} has {} values but {} lookup columns were declared",
                    i,
                    row.len(),
                    lookup_columns.len()
                )));
            }
        }

        let table_q = quote_ident(table)?;
        let id_q = quote_idents(id_columns)?;
        let lookup_q = quote_idents(lookup_columns)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        self.open().await?;
        self.begin_if_needed().await?;

        let mut out = Vec::new();
        let conn = self.conn_ref()?;
        for chunk in rows.chunks(ID_LOOKUP_CHUNK) {
            let sql = build_id_lookup_sql(&table_q, &id_q, &lookup_q, chunk);
            let boxed: Vec<_> = chunk
                .iter()
                .flat_map(|row| row.iter().map(SqlValue::to_param))
                .collect();
            let refs = param_refs(&boxed);
            for row in conn.client.query(&sql, &refs).await? {
                let mut ids = Vec::with_capacity(id_q.len());
                for idx in 0..id_q.len() {
                    ids.push(row.try_get::<_, i64>(idx)?);
                }
                out.push(ids);
            }
        }
        Ok(out)
    }

    /// [`fetch_ids_bulk`](DbSession::fetch_ids_bulk) for the common case
    /// of a single id column, flattening the result.
    pub async fn fetch_ids_bulk_single(
        &mut self,
        table: &str,
        id_column: &str,
        lookup_columns: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<Vec<i64>> {
        let tuples = self
            .fetch_ids_bulk(table, &[id_column], lookup_columns, rows)
            .await?;
        Ok(tuples.into_iter().filter_map(|t| t.into_iter().next()).collect())
    }

    /// Check whether a table exists in the current schema.
    pub async fn table_exists(&mut self, table: &str) -> Result<bool> {
        validate_identifier(table)?;
        self.open().await?;
        let conn = self.conn_ref()?;
        let row = conn
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = current_schema() AND table_name = $1
                )",
                &[&table],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Count the rows in a table.
    pub async fn row_count(&mut self, table: &str) -> Result<i64> {
        let table_q = quote_ident(table)?;
        self.open().await?;
        let conn = self.conn_ref()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table_q);
        let row = conn.client.query_one(&sql, &[]).await?;
        Ok(row.try_get(0)?)
    }

    fn conn_ref(&self) -> Result<&OpenConn> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::invalid("session is not open"))
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        let autocommit = self.autocommit;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::invalid("session is not open"))?;
        if !autocommit && !conn.in_txn {
            conn.client.batch_execute("BEGIN").await?;
            conn.in_txn = true;
        }
        Ok(())
    }
}

/// Build one chunk's lookup statement: the candidate rows as an inline
/// `VALUES` table joined against the target on the lookup columns.
fn build_id_lookup_sql(
    table_q: &str,
    id_q: &[String],
    lookup_q: &[String],
    chunk: &[Vec<SqlValue>],
) -> String {
    let projection: Vec<String> = id_q.iter().map(|c| format!("t.{}::bigint", c)).collect();

    // Casts come from the first row; all rows in a batch share a shape.
    let casts: Vec<&'static str> = match chunk.first() {
        Some(row) => row.iter().map(SqlValue::cast_suffix).collect(),
        None => Vec::new(),
    };

    let mut idx = 1;
    let mut value_rows = Vec::with_capacity(chunk.len());
    for row in chunk {
        let placeholders: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col, value)| {
                let cast = casts
                    .get(col)
                    .copied()
                    .unwrap_or_else(|| value.cast_suffix());
                let p = format!("${}{}", idx, cast);
                idx += 1;
                p
            })
            .collect();
        value_rows.push(format!("({})", placeholders.join(", ")));
    }

    let join_cond: Vec<String> = lookup_q
        .iter()
        .map(|c| format!("t.{} = v.{}", c, c))
        .collect();

    format!(
        "SELECT {} FROM {} AS t JOIN (VALUES {}) AS v({}) ON {}",
        projection.join(", "),
        table_q,
        value_rows.join(", "),
        lookup_q.join(", "),
        join_cond.join(" AND ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_session() -> DbSession {
        // Bogus target: every test here must fail (or pass) before any
        // connection attempt, so the address is never dialed.
        DbSession::new("host=unreachable.invalid dbname=x user=x password=x")
    }

    // =========================================================================
    // Precondition checks happen before any connection work
    // =========================================================================

    #[tokio::test]
    async fn test_run_many_rejects_conflicting_flags() {
        let mut session = closed_session();
        let err = session
            .run_many("SELECT 1", &[], true, true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_run_many_rejects_missing_shape() {
        let mut session = closed_session();
        let err = session
            .run_many("SELECT 1", &[], false, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_fetch_ids_bulk_rejects_empty_column_lists() {
        let mut session = closed_session();
        let err = session
            .fetch_ids_bulk("t", &[], &["sku"], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));

        let err = session.fetch_ids_bulk("t", &["ID"], &[], &[]).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_fetch_ids_bulk_rejects_ragged_rows() {
        let mut session = closed_session();
        let rows = vec![vec![SqlValue::I64(1), SqlValue::I64(2)]];
        let err = session
            .fetch_ids_bulk("t", &["ID"], &["sku"], &rows)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_commit_and_rollback_are_noops_when_closed() {
        let mut session = closed_session();
        session.commit().await.unwrap();
        session.rollback().await.unwrap();
        session.close().await;
        assert!(!session.is_open());
    }

    // =========================================================================
    // Statement construction
    // =========================================================================

    #[test]
    fn test_build_id_lookup_sql_single_column() {
        let chunk = vec![
            vec![SqlValue::Text("a".into())],
            vec![SqlValue::Text("b".into())],
        ];
        let sql = build_id_lookup_sql(
            "\"sku\"",
            &["\"ID\"".to_string()],
            &["\"name\"".to_string()],
            &chunk,
        );
        assert_eq!(
            sql,
            "SELECT t.\"ID\"::bigint FROM \"sku\" AS t \
             JOIN (VALUES ($1::text), ($2::text)) AS v(\"name\") \
             ON t.\"name\" = v.\"name\""
        );
    }

    #[test]
    fn test_build_id_lookup_sql_composite() {
        let chunk = vec![vec![SqlValue::I64(1), SqlValue::Text("x".into())]];
        let sql = build_id_lookup_sql(
            "\"stock\"",
            &["\"ID\"".to_string(), "\"locationID\"".to_string()],
            &["\"skuID\"".to_string(), "\"region\"".to_string()],
            &chunk,
        );
        assert_eq!(
            sql,
            "SELECT t.\"ID\"::bigint, t.\"locationID\"::bigint FROM \"stock\" AS t \
             JOIN (VALUES ($1::bigint, $2::text)) AS v(\"skuID\", \"region\") \
             ON t.\"skuID\" = v.\"skuID\" AND t.\"region\" = v.\"region\""
        );
    }

    #[test]
    fn test_lookup_chunking_boundaries() {
        let rows: Vec<Vec<SqlValue>> = (0..250).map(|i| vec![SqlValue::I64(i)]).collect();
        let sizes: Vec<usize> = rows.chunks(ID_LOOKUP_CHUNK).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }
}
