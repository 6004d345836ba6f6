//! Scope reconciliation.
//!
//! Guarantees that every identifier expected for a dataset partition has a
//! row in a target table, inserting zero-valued placeholder rows for any
//! gap. Re-running is safe: backfilled rows conflict on the full key tuple
//! and are skipped.

use std::collections::HashSet;

use tracing::{error, info};

use crate::core::identifier::{quote_ident, quote_idents};
use crate::core::value::SqlValue;
use crate::error::{DbError, Result};
use crate::session::{DbSession, Fetch};

/// Which rows must exist, and where, for a reconciliation run.
#[derive(Debug, Clone)]
pub struct ScopeCheck {
    /// Table whose rows are checked and backfilled.
    pub target_table: String,

    /// Table defining the expected identifier universe for a partition.
    pub reference_table: String,

    /// Partition-key column, present in both tables.
    pub dataset_column: String,

    /// Identifier column, present in both tables.
    pub id_column: String,

    /// Columns set to zero on backfilled rows.
    pub insert_arguments: Vec<String>,

    /// Additional fixed-value primary-key columns in the target table.
    pub further_primary_keys: Option<Vec<String>>,

    /// Values for `further_primary_keys`, in the same order.
    pub further_primary_keys_values: Option<Vec<SqlValue>>,
}

/// Ensure every in-scope identifier has a row in the target table.
///
/// Identifiers present in the reference table for `dataset_id` but absent
/// from the target table are inserted with all `insert_arguments` columns
/// set to zero, followed by a single commit. Returns the number of rows
/// backfilled.
///
/// Fail-loud: any database error is logged with the target table name and
/// re-raised unchanged.
pub async fn ensure_in_scope(
    session: &mut DbSession,
    check: &ScopeCheck,
    dataset_id: &SqlValue,
) -> Result<u64> {
    let further = further_keys(check)?;

    match run_check(session, check, further, dataset_id).await {
        Ok(backfilled) => Ok(backfilled),
        Err(e) => {
            error!(
                "error checking in-scope entries for {}: {}",
                check.target_table, e
            );
            Err(e)
        }
    }
}

/// Validate the paired further-key arguments.
fn further_keys(check: &ScopeCheck) -> Result<Option<(&[String], &[SqlValue])>> {
    match (
        &check.further_primary_keys,
        &check.further_primary_keys_values,
    ) {
        (Some(keys), Some(values)) => {
            if keys.len() != values.len() {
                return Err(DbError::invalid(format!(
                    "further_primary_keys has {} entries but further_primary_keys_values has {}",
                    keys.len(),
                    values.len()
                )));
            }
            Ok(Some((keys.as_slice(), values.as_slice())))
        }
        (None, None) => Ok(None),
        _ => Err(DbError::invalid(
            "both further_primary_keys and further_primary_keys_values must be provided together",
        )),
    }
}

async fn run_check(
    session: &mut DbSession,
    check: &ScopeCheck,
    further: Option<(&[String], &[SqlValue])>,
    dataset_id: &SqlValue,
) -> Result<u64> {
    let target_q = quote_ident(&check.target_table)?;
    let ref_q = quote_ident(&check.reference_table)?;
    let ds_q = quote_ident(&check.dataset_column)?;
    let id_q = quote_ident(&check.id_column)?;
    let args_q = quote_idents(&check.insert_arguments)?;
    let further_q = match further {
        Some((keys, _)) => quote_idents(keys)?,
        None => Vec::new(),
    };

    // Step 1: every identifier expected for this partition.
    let universe_sql = format!(
        "SELECT {}::bigint FROM {} WHERE {} = $1{}",
        id_q,
        ref_q,
        ds_q,
        dataset_id.cast_suffix()
    );
    let rows = session
        .run(&universe_sql, std::slice::from_ref(dataset_id), Fetch::All, false)
        .await?
        .into_rows();
    let mut universe = HashSet::with_capacity(rows.len());
    for row in rows {
        universe.insert(row.try_get::<_, i64>(0)?);
    }

    // Step 2: identifiers already present in the target table.
    let mut existing_sql = format!(
        "SELECT DISTINCT {}::bigint FROM {} WHERE {} = $1{}",
        id_q,
        target_q,
        ds_q,
        dataset_id.cast_suffix()
    );
    let mut existing_params = vec![dataset_id.clone()];
    if let Some((_, values)) = further {
        for (i, (col_q, value)) in further_q.iter().zip(values).enumerate() {
            existing_sql.push_str(&format!(
                " AND {} = ${}{}",
                col_q,
                i + 2,
                value.cast_suffix()
            ));
            existing_params.push(value.clone());
        }
    }
    let rows = session
        .run(&existing_sql, &existing_params, Fetch::All, false)
        .await?
        .into_rows();
    let mut existing = HashSet::with_capacity(rows.len());
    for row in rows {
        existing.insert(row.try_get::<_, i64>(0)?);
    }

    // Step 3: the gap.
    let missing = missing_ids(&universe, &existing);
    if missing.is_empty() {
        info!("no missing ids to handle for {}", check.target_table);
        session.commit().await?;
        return Ok(0);
    }
    info!(
        "adding missing ids for {}: {:?}",
        check.target_table, missing
    );

    // Step 4: zero-valued placeholder rows, idempotent on re-run.
    let further_casts: Vec<&'static str> = match further {
        Some((_, values)) => values.iter().map(SqlValue::cast_suffix).collect(),
        None => Vec::new(),
    };
    let insert_sql = build_backfill_sql(
        &target_q,
        &id_q,
        &ds_q,
        &args_q,
        &further_q,
        dataset_id.cast_suffix(),
        &further_casts,
    );
    let param_sets: Vec<Vec<SqlValue>> = missing
        .iter()
        .map(|id| {
            let mut params = vec![SqlValue::I64(*id), dataset_id.clone()];
            if let Some((_, values)) = further {
                params.extend(values.iter().cloned());
            }
            params
        })
        .collect();
    session
        .run_many(&insert_sql, &param_sets, false, true, false)
        .await?;

    // Step 5: one commit for the whole backfill.
    session.commit().await?;
    info!("missing ids handled for {}", check.target_table);
    Ok(missing.len() as u64)
}

/// Pure set difference; no ordering guarantee.
fn missing_ids(universe: &HashSet<i64>, existing: &HashSet<i64>) -> Vec<i64> {
    universe.difference(existing).copied().collect()
}

/// Build the backfill insert: key columns carry parameters, every
/// insert-argument column is literal zero, and the full key tuple is the
/// conflict target.
fn build_backfill_sql(
    target_q: &str,
    id_q: &str,
    ds_q: &str,
    args_q: &[String],
    further_q: &[String],
    ds_cast: &str,
    further_casts: &[&'static str],
) -> String {
    let mut columns = vec![id_q.to_string(), ds_q.to_string()];
    columns.extend(args_q.iter().cloned());
    columns.extend(further_q.iter().cloned());

    let mut values = vec!["$1::bigint".to_string(), format!("$2{}", ds_cast)];
    values.extend(args_q.iter().map(|_| "0".to_string()));
    for (i, cast) in further_casts.iter().enumerate() {
        values.push(format!("${}{}", i + 3, cast));
    }

    let mut conflict = vec![id_q.to_string(), ds_q.to_string()];
    conflict.extend(further_q.iter().cloned());

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO NOTHING",
        target_q,
        columns.join(", "),
        values.join(", "),
        conflict.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_session() -> DbSession {
        DbSession::new("host=unreachable.invalid dbname=x user=x password=x")
    }

    fn base_check() -> ScopeCheck {
        ScopeCheck {
            target_table: "demand".into(),
            reference_table: "dataset_matching".into(),
            dataset_column: "datasetID".into(),
            id_column: "skuID".into(),
            insert_arguments: vec!["forecast".into(), "actual".into()],
            further_primary_keys: None,
            further_primary_keys_values: None,
        }
    }

    // =========================================================================
    // Precondition checks
    // =========================================================================

    #[tokio::test]
    async fn test_further_keys_require_both_arguments() {
        let mut session = closed_session();
        let mut check = base_check();
        check.further_primary_keys = Some(vec!["modelID".into()]);

        let err = ensure_in_scope(&mut session, &check, &SqlValue::I64(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_further_values_require_both_arguments() {
        let mut session = closed_session();
        let mut check = base_check();
        check.further_primary_keys_values = Some(vec![SqlValue::I64(7)]);

        let err = ensure_in_scope(&mut session, &check, &SqlValue::I64(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_further_keys_length_mismatch() {
        let mut session = closed_session();
        let mut check = base_check();
        check.further_primary_keys = Some(vec!["modelID".into(), "runID".into()]);
        check.further_primary_keys_values = Some(vec![SqlValue::I64(7)]);

        let err = ensure_in_scope(&mut session, &check, &SqlValue::I64(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(!session.is_open());
    }

    // =========================================================================
    // Set difference
    // =========================================================================

    #[test]
    fn test_missing_ids_set_difference() {
        let universe: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let existing: HashSet<i64> = [2].into_iter().collect();
        let mut missing = missing_ids(&universe, &existing);
        missing.sort_unstable();
        assert_eq!(missing, vec![1, 3]);
    }

    #[test]
    fn test_missing_ids_empty_when_covered() {
        let universe: HashSet<i64> = [1, 2].into_iter().collect();
        let existing: HashSet<i64> = [1, 2, 9].into_iter().collect();
        assert!(missing_ids(&universe, &existing).is_empty());
    }

    // =========================================================================
    // Statement construction
    // =========================================================================

    #[test]
    fn test_build_backfill_sql_simple_key() {
        let sql = build_backfill_sql(
            "\"demand\"",
            "\"skuID\"",
            "\"datasetID\"",
            &["\"forecast\"".to_string(), "\"actual\"".to_string()],
            &[],
            "::bigint",
            &[],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"demand\" (\"skuID\", \"datasetID\", \"forecast\", \"actual\") \
             VALUES ($1::bigint, $2::bigint, 0, 0) \
             ON CONFLICT (\"skuID\", \"datasetID\") DO NOTHING"
        );
    }

    #[test]
    fn test_build_backfill_sql_composite_key() {
        let sql = build_backfill_sql(
            "\"demand\"",
            "\"skuID\"",
            "\"datasetID\"",
            &["\"forecast\"".to_string()],
            &["\"modelID\"".to_string()],
            "::bigint",
            &["::text"],
        );
        assert_eq!(
            sql,
            "INSERT INTO \"demand\" (\"skuID\", \"datasetID\", \"forecast\", \"modelID\") \
             VALUES ($1::bigint, $2::bigint, 0, $3::text) \
             ON CONFLICT (\"skuID\", \"datasetID\", \"modelID\") DO NOTHING"
        );
    }
}
