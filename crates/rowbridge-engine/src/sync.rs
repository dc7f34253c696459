//! Sync phase: reconcile staged data into the permanent schema.
//!
//! Upserts walk the catalog in dependency order; deletes of rows missing
//! from staging walk it in reverse so dependents go before the rows they
//! reference. Updates are guarded so an unchanged row performs no write,
//! which is what makes a second sync run a no-op.

use tracing::info;

use rowbridge_types::error::MigrationError;

use crate::catalog::TableSpec;
use crate::config::MigrationConfig;
use crate::result::SyncCounts;
use crate::store::TargetStore;

/// Reconciles every staged table into the permanent schema.
///
/// # Errors
///
/// Propagates store failures. On error, target-table triggers may be left
/// disabled; the run ends `FAILED` and the operator re-enables them when
/// resolving the retained staging schema.
pub async fn run_sync<T: TargetStore>(
    target: &T,
    cfg: &MigrationConfig,
    tables: &[&'static TableSpec],
) -> Result<Vec<SyncCounts>, MigrationError> {
    let mut counts = Vec::with_capacity(tables.len());

    for table in tables {
        let columns: Vec<String> = target
            .table_columns(&cfg.target_schema, table.name)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let has_updated_at = columns.iter().any(|c| c == "updated_at");
        let staged = target.count_rows(&cfg.staging_schema, table.name).await?;

        target.set_triggers(&cfg.target_schema, table.name, false).await?;
        let stats = target
            .upsert_from_staging(
                &cfg.staging_schema,
                &cfg.target_schema,
                table,
                &columns,
                has_updated_at,
            )
            .await?;

        counts.push(SyncCounts {
            table: table.name.to_string(),
            inserted: stats.inserted,
            updated: stats.updated,
            unchanged: staged.saturating_sub(stats.inserted + stats.updated),
            deleted: 0,
        });
    }

    // Dependents shrink before the tables they reference.
    for table in tables.iter().rev() {
        let deleted = target
            .delete_missing(&cfg.staging_schema, &cfg.target_schema, table)
            .await?;
        if let Some(entry) = counts.iter_mut().find(|c| c.table == table.name) {
            entry.deleted = deleted;
        }
    }

    for table in tables {
        target.set_triggers(&cfg.target_schema, table.name, true).await?;
    }

    for entry in &counts {
        info!(
            table = %entry.table,
            inserted = entry.inserted,
            updated = entry.updated,
            unchanged = entry.unchanged,
            deleted = entry.deleted,
            "table synced"
        );
    }
    Ok(counts)
}
