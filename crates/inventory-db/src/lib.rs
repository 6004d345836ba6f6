//! # inventory-db
//!
//! PostgreSQL helpers for inventory data pipelines:
//!
//! - **Credentials** loaded from the project's YAML configuration
//! - **Sessions** owning a single connection with managed transactions
//! - **Bulk inserts** with conflict skipping or per-record returned IDs
//! - **Scope reconciliation** backfilling missing dimension rows
//! - **Write-status folding** for pipeline consolidation nodes
//!
//! ## Example
//!
//! ```rust,no_run
//! use inventory_db::{
//!     insert_rows_returning_ids, ColumnSpec, ColumnType, Config, DbSession, InsertOptions,
//!     RowBatch, SqlValue,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> inventory_db::Result<()> {
//!     let config = Config::load("conf/credentials.yml")?;
//!     let mut session = DbSession::from_credentials(config.db_credentials());
//!
//!     let batch = RowBatch::new(vec![
//!         vec![SqlValue::from("SKU-001"), SqlValue::from(12i64)],
//!         vec![SqlValue::from("SKU-002"), SqlValue::from(7i64)],
//!     ]);
//!     let spec = ColumnSpec::new(vec!["name", "qty"], vec![ColumnType::Text, ColumnType::Int]);
//!
//!     let assigned = insert_rows_returning_ids(
//!         &mut session,
//!         "sku",
//!         &batch,
//!         &spec,
//!         &["name"],
//!         "ID",
//!         &InsertOptions::default(),
//!     )
//!     .await?;
//!     println!("assigned ids: {:?}", assigned.ids);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod insert;
pub mod pipeline;
pub mod reconcile;
pub mod session;

// Re-exports for convenient access
pub use crate::config::{Config, Credentials, PostgresCredentials};
pub use crate::core::{coerce, quote_ident, validate_identifier, ColumnType, SqlNullType, SqlValue};
pub use crate::error::{DbError, Result};
pub use crate::insert::{
    insert_rows, insert_rows_returning_ids, ColumnSpec, IdAssignment, InsertOptions, RowBatch,
};
pub use crate::pipeline::verify_write_status;
pub use crate::reconcile::{ensure_in_scope, ScopeCheck};
pub use crate::session::{DbSession, Fetch, Fetched};
