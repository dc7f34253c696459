//! Store traits the engine runs against.
//!
//! The transfer, cleanup, and sync engines are generic over these traits;
//! the `mysql` and `postgres` modules hold the production implementations
//! and the integration tests substitute in-memory fakes.

use rowbridge_types::error::MigrationError;
use rowbridge_types::registry::IdentifierRecord;
use rowbridge_types::value::{TargetType, Value};

use crate::catalog::TableSpec;

pub mod dry_run;
pub mod mysql;
pub mod postgres;

pub use dry_run::DryRunTarget;
pub use mysql::MySqlSource;
pub use postgres::PgTarget;

/// One target column with its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: TargetType,
}

/// Insert/update counts from one per-table upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: u64,
    pub updated: u64,
}

/// Read-only access to the operational source database.
pub trait SourceStore {
    /// Tables present on the source, lowercased.
    async fn list_tables(&self) -> Result<Vec<String>, MigrationError>;

    async fn count_rows(&self, table: &str) -> Result<u64, MigrationError>;

    async fn column_names(&self, table: &str) -> Result<Vec<String>, MigrationError>;

    /// One page of rows, ordered by primary key for stable pagination.
    async fn fetch_page(
        &self,
        table: &TableSpec,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<Value>>, MigrationError>;

    /// SIRET identifiers plus the source attributes used to score
    /// correction candidates. Read from the source so dry runs produce the
    /// same reports as live runs.
    async fn identifier_records(
        &self,
        table: &TableSpec,
    ) -> Result<Vec<IdentifierRecord>, MigrationError>;
}

/// Write access to the warehouse, covering both the permanent schema and the
/// ephemeral staging schema.
pub trait TargetStore {
    async fn schema_exists(&self, schema: &str) -> Result<bool, MigrationError>;

    async fn create_schema(&self, schema: &str) -> Result<(), MigrationError>;

    async fn drop_schema(&self, schema: &str) -> Result<(), MigrationError>;

    /// Creates `staging.table` as a structural copy of `target.table`
    /// (`LIKE ... INCLUDING ALL`) with triggers disabled.
    async fn create_shadow_table(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &str,
    ) -> Result<(), MigrationError>;

    async fn set_triggers(
        &self,
        schema: &str,
        table: &str,
        enabled: bool,
    ) -> Result<(), MigrationError>;

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDef>, MigrationError>;

    /// Inserts one batch atomically: all rows land or none do.
    async fn insert_batch(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), MigrationError>;

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, MigrationError>;

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>, MigrationError>;

    /// Repoints every dependent's foreign-key rows from one referenced id to
    /// another, all inside one transaction, returning the number of rows
    /// touched. Each dependent is a `(table, fk_column)` pair.
    ///
    /// # Errors
    ///
    /// A uniqueness conflict in any dependent rolls back every repoint and
    /// surfaces as a `Data` error with code `UNIQUE_VIOLATION`; the caller
    /// flags the merge instead of dropping rows.
    async fn repoint_references(
        &self,
        schema: &str,
        dependents: &[(&str, &str)],
        from_id: i64,
        to_id: i64,
    ) -> Result<u64, MigrationError>;

    async fn delete_rows(
        &self,
        schema: &str,
        table: &str,
        pk_column: &str,
        ids: &[i64],
    ) -> Result<u64, MigrationError>;

    /// Removes staged rows whose `deleted_at` is set.
    async fn purge_soft_deleted(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<u64, MigrationError>;

    /// Upserts one table from staging into the permanent schema in a single
    /// transaction. Updates are guarded so an unchanged row performs no
    /// write: by `updated_at` recency when the column exists, column-wise
    /// `IS DISTINCT FROM` otherwise.
    async fn upsert_from_staging(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
        columns: &[String],
        has_updated_at: bool,
    ) -> Result<UpsertStats, MigrationError>;

    /// Deletes permanent rows whose key is absent from staging.
    async fn delete_missing(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
    ) -> Result<u64, MigrationError>;
}
