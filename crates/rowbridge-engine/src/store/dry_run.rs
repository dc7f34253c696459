//! Dry-run decorator for a target store: reads pass through, writes do
//! nothing and report zero rows touched.

use rowbridge_types::error::MigrationError;
use rowbridge_types::value::Value;

use crate::catalog::TableSpec;

use super::{ColumnDef, TargetStore, UpsertStats};

/// Wraps a real target store, turning every write into a no-op.
///
/// Reads against the staging schema report it empty, since a dry run never
/// populates it. The staging-conflict check still runs against the real
/// store, so a dry run fails on a stale staging schema exactly like a live
/// run would.
pub struct DryRunTarget<T> {
    inner: T,
    staging_schema: String,
    target_schema: String,
}

impl<T: TargetStore> DryRunTarget<T> {
    pub fn new(inner: T, staging_schema: &str, target_schema: &str) -> Self {
        Self {
            inner,
            staging_schema: staging_schema.to_string(),
            target_schema: target_schema.to_string(),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: TargetStore> TargetStore for DryRunTarget<T> {
    async fn schema_exists(&self, schema: &str) -> Result<bool, MigrationError> {
        self.inner.schema_exists(schema).await
    }

    async fn create_schema(&self, _schema: &str) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn drop_schema(&self, _schema: &str) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn create_shadow_table(
        &self,
        _staging_schema: &str,
        _target_schema: &str,
        _table: &str,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn set_triggers(
        &self,
        _schema: &str,
        _table: &str,
        _enabled: bool,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDef>, MigrationError> {
        // Shadow tables are structural copies, and none exist in a dry run.
        let schema = if schema == self.staging_schema { &self.target_schema } else { schema };
        self.inner.table_columns(schema, table).await
    }

    async fn insert_batch(
        &self,
        _schema: &str,
        _table: &str,
        _columns: &[String],
        _rows: Vec<Vec<Value>>,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, MigrationError> {
        if schema == self.staging_schema {
            return Ok(0);
        }
        self.inner.count_rows(schema, table).await
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>, MigrationError> {
        if schema == self.staging_schema {
            return Ok(Vec::new());
        }
        self.inner.fetch_rows(schema, table, columns).await
    }

    async fn repoint_references(
        &self,
        _schema: &str,
        _dependents: &[(&str, &str)],
        _from_id: i64,
        _to_id: i64,
    ) -> Result<u64, MigrationError> {
        Ok(0)
    }

    async fn delete_rows(
        &self,
        _schema: &str,
        _table: &str,
        _pk_column: &str,
        _ids: &[i64],
    ) -> Result<u64, MigrationError> {
        Ok(0)
    }

    async fn purge_soft_deleted(
        &self,
        _schema: &str,
        _table: &str,
    ) -> Result<u64, MigrationError> {
        Ok(0)
    }

    async fn upsert_from_staging(
        &self,
        _staging_schema: &str,
        _target_schema: &str,
        _table: &TableSpec,
        _columns: &[String],
        _has_updated_at: bool,
    ) -> Result<UpsertStats, MigrationError> {
        Ok(UpsertStats::default())
    }

    async fn delete_missing(
        &self,
        _staging_schema: &str,
        _target_schema: &str,
        _table: &TableSpec,
    ) -> Result<u64, MigrationError> {
        Ok(0)
    }
}
