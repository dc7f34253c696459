//! MySQL/MariaDB source store.
//!
//! Every query issued here charges the run's query budget and is timed
//! against the slow-query threshold. All access is read-only.

use std::sync::Arc;
use std::time::Instant;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use rowbridge_types::error::MigrationError;
use rowbridge_types::registry::IdentifierRecord;
use rowbridge_types::value::Value;

use crate::budget::{QueryBudget, QueryMetrics};
use crate::catalog::TableSpec;
use crate::config::DbConfig;

use super::SourceStore;

/// Source store backed by a MySQL/MariaDB connection pool.
pub struct MySqlSource {
    pool: MySqlPool,
    budget: Arc<QueryBudget>,
    metrics: Arc<QueryMetrics>,
}

impl MySqlSource {
    /// Opens a small pool against the source database.
    ///
    /// # Errors
    ///
    /// Returns a `TransientNetwork` error when the source is unreachable.
    pub async fn connect(
        cfg: &DbConfig,
        budget: Arc<QueryBudget>,
        metrics: Arc<QueryMetrics>,
    ) -> Result<Self, MigrationError> {
        let opts = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database);
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| {
                MigrationError::transient_network(
                    "SOURCE_UNREACHABLE",
                    format!("cannot connect to source {}:{}: {e}", cfg.host, cfg.port),
                )
            })?;
        Ok(Self { pool, budget, metrics })
    }

    async fn query_all(&self, op: &str, sql: &str) -> Result<Vec<MySqlRow>, MigrationError> {
        self.budget.charge();
        let started = Instant::now();
        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(map_err)?;
        self.metrics.record(op, sql, started.elapsed());
        Ok(rows)
    }
}

impl SourceStore for MySqlSource {
    async fn list_tables(&self) -> Result<Vec<String>, MigrationError> {
        let rows = self
            .query_all(
                "list_tables",
                "SELECT LOWER(table_name) AS table_name \
                 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() \
                 ORDER BY table_name",
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(map_err))
            .collect()
    }

    async fn count_rows(&self, table: &str) -> Result<u64, MigrationError> {
        let sql = format!("SELECT COUNT(*) FROM `{table}`");
        let rows = self.query_all("count_rows", &sql).await?;
        let count: i64 = rows
            .first()
            .ok_or_else(|| MigrationError::internal("EMPTY_COUNT", format!("COUNT on {table}")))?
            .try_get(0)
            .map_err(map_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, MigrationError> {
        let sql = format!(
            "SELECT LOWER(column_name) AS column_name \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = '{table}' \
             ORDER BY ordinal_position"
        );
        let rows = self.query_all("column_names", &sql).await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>(0).map_err(map_err))
            .collect()
    }

    async fn fetch_page(
        &self,
        table: &TableSpec,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<Value>>, MigrationError> {
        let cols = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {cols} FROM `{}` ORDER BY `{}` LIMIT {limit} OFFSET {offset}",
            table.name, table.primary_key
        );
        let rows = self.query_all("fetch_page", &sql).await?;
        rows.iter()
            .map(|row| (0..columns.len()).map(|i| decode_cell(row, i)).collect())
            .collect()
    }

    async fn identifier_records(
        &self,
        table: &TableSpec,
    ) -> Result<Vec<IdentifierRecord>, MigrationError> {
        let Some(id_col) = table.identifier_column else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT `{id_col}`, `name`, `city_code`, `city_name` \
             FROM `{}` WHERE `{id_col}` IS NOT NULL AND `{id_col}` <> '' \
             ORDER BY `{}`",
            table.name, table.primary_key
        );
        let rows = self.query_all("identifier_records", &sql).await?;
        rows.iter()
            .map(|r| {
                Ok(IdentifierRecord {
                    siret: r.try_get::<String, _>(0).map_err(map_err)?,
                    expected_name: r.try_get::<Option<String>, _>(1).map_err(map_err)?,
                    expected_city_code: r.try_get::<Option<String>, _>(2).map_err(map_err)?,
                    expected_city_name: r.try_get::<Option<String>, _>(3).map_err(map_err)?,
                })
            })
            .collect()
    }
}

/// Decodes one cell by its wire type name into the transit [`Value`] model.
fn decode_cell(row: &MySqlRow, idx: usize) -> Result<Value, MigrationError> {
    let column = row.column(idx);
    let type_name = column.type_info().name().to_ascii_uppercase();

    let value = if type_name.contains("DECIMAL") {
        // Decimals travel as text on the wire; decode without the
        // compatibility check and let the conversion table parse them.
        row.try_get_unchecked::<Option<String>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Text)
    } else if type_name.contains("UNSIGNED") {
        row.try_get::<Option<u64>, _>(idx)
            .map_err(map_err)?
            .map_or(Ok(Value::Null), |u| {
                i64::try_from(u).map(Value::Int).map_err(|_| {
                    MigrationError::conversion(
                        "BAD_VALUE",
                        format!("unsigned value {u} in column {} overflows", column.name()),
                    )
                })
            })?
    } else {
        match type_name.as_str() {
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::Bool),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<Option<i64>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::Int),
            "FLOAT" | "DOUBLE" => row
                .try_get::<Option<f64>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::Float),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::Date),
            "DATETIME" | "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::DateTime),
            _ => row
                .try_get_unchecked::<Option<String>, _>(idx)
                .map_err(map_err)?
                .map_or(Value::Null, Value::Text),
        }
    };
    Ok(value)
}

fn map_err(e: sqlx::Error) -> MigrationError {
    match &e {
        sqlx::Error::Database(db) => {
            MigrationError::transient_db("SOURCE_DB_ERROR", db.message().to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
            MigrationError::transient_network("SOURCE_IO", e.to_string())
        }
        _ => MigrationError::internal("SOURCE_DRIVER", e.to_string()),
    }
}
