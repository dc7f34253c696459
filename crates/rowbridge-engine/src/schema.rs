//! Staging schema lifecycle.
//!
//! One run owns the staging schema from `prepare` to `discard`. A leftover
//! schema from an earlier run is never overwritten: it either holds data an
//! operator still needs, or it marks a concurrent run writing to the same
//! name. Either way the new run must fail fast.

use tracing::info;

use rowbridge_types::error::MigrationError;

use crate::catalog::TableSpec;
use crate::store::TargetStore;

/// Handle to a prepared staging schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingSchema {
    pub name: String,
    pub tables: Vec<String>,
}

/// Creates the staging schema and one shadow table per migrated table.
///
/// Shadow tables are structural copies of their permanent counterparts with
/// triggers disabled, so staged writes fire no side effects.
///
/// # Errors
///
/// Fails with `STALE_STAGING` when the schema already exists.
pub async fn prepare<T: TargetStore>(
    target: &T,
    staging_schema: &str,
    target_schema: &str,
    tables: &[&'static TableSpec],
) -> Result<StagingSchema, MigrationError> {
    if target.schema_exists(staging_schema).await? {
        return Err(MigrationError::schema_conflict(
            "STALE_STAGING",
            format!(
                "staging schema {staging_schema:?} already exists; inspect it and drop it \
                 before starting a new run"
            ),
        ));
    }

    target.create_schema(staging_schema).await?;
    for table in tables {
        target
            .create_shadow_table(staging_schema, target_schema, table.name)
            .await?;
    }
    info!(schema = staging_schema, tables = tables.len(), "staging schema prepared");

    Ok(StagingSchema {
        name: staging_schema.to_string(),
        tables: tables.iter().map(|t| t.name.to_string()).collect(),
    })
}

/// Drops the staging schema and everything in it.
///
/// # Errors
///
/// Propagates target store failures.
pub async fn discard<T: TargetStore>(
    target: &T,
    schema: &StagingSchema,
) -> Result<(), MigrationError> {
    target.drop_schema(&schema.name).await?;
    info!(schema = %schema.name, "staging schema dropped");
    Ok(())
}
