//! PostgreSQL target store.
//!
//! Owns both the permanent warehouse schema and the ephemeral staging
//! schema. Batch inserts and per-table upserts each run inside a single
//! transaction.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use rowbridge_types::error::MigrationError;
use rowbridge_types::value::{TargetType, Value};

use crate::catalog::TableSpec;
use crate::config::DbConfig;

use super::{ColumnDef, TargetStore, UpsertStats};

// PostgreSQL caps bind parameters per statement at 65535.
const MAX_BIND_PARAMS: usize = 65_000;

/// Target store backed by a PostgreSQL connection pool.
pub struct PgTarget {
    pool: PgPool,
}

impl PgTarget {
    /// Opens a small pool against the warehouse.
    ///
    /// # Errors
    ///
    /// Returns a `TransientNetwork` error when the target is unreachable.
    pub async fn connect(cfg: &DbConfig) -> Result<Self, MigrationError> {
        let opts = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database);
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| {
                MigrationError::transient_network(
                    "TARGET_UNREACHABLE",
                    format!("cannot connect to target {}:{}: {e}", cfg.host, cfg.port),
                )
            })?;
        Ok(Self { pool })
    }

    async fn execute(&self, sql: &str) -> Result<u64, MigrationError> {
        let done = sqlx::query(sql).execute(&self.pool).await.map_err(map_err)?;
        Ok(done.rows_affected())
    }
}

impl TargetStore for PgTarget {
    async fn schema_exists(&self, schema: &str) -> Result<bool, MigrationError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(exists)
    }

    async fn create_schema(&self, schema: &str) -> Result<(), MigrationError> {
        self.execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\"")).await?;
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> Result<(), MigrationError> {
        self.execute(&format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE")).await?;
        Ok(())
    }

    async fn create_shadow_table(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &str,
    ) -> Result<(), MigrationError> {
        self.execute(&format!(
            "CREATE TABLE \"{staging_schema}\".\"{table}\" \
             (LIKE \"{target_schema}\".\"{table}\" INCLUDING ALL)"
        ))
        .await?;
        self.execute(&format!(
            "ALTER TABLE \"{staging_schema}\".\"{table}\" DISABLE TRIGGER ALL"
        ))
        .await?;
        Ok(())
    }

    async fn set_triggers(
        &self,
        schema: &str,
        table: &str,
        enabled: bool,
    ) -> Result<(), MigrationError> {
        let verb = if enabled { "ENABLE" } else { "DISABLE" };
        self.execute(&format!(
            "ALTER TABLE \"{schema}\".\"{table}\" {verb} TRIGGER ALL"
        ))
        .await?;
        Ok(())
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDef>, MigrationError> {
        let rows = sqlx::query(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get(0).map_err(map_err)?;
            let data_type: String = row.try_get(1).map_err(map_err)?;
            match TargetType::parse(&data_type) {
                Some(ty) => columns.push(ColumnDef { name, data_type: ty }),
                None => {
                    tracing::debug!(table, column = %name, %data_type, "skipping unmapped column type");
                }
            }
        }
        Ok(columns)
    }

    async fn insert_batch(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), MigrationError> {
        if rows.is_empty() {
            return Ok(());
        }
        let col_list = quoted_list(columns);
        let rows_per_stmt = (MAX_BIND_PARAMS / columns.len().max(1)).max(1);

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        for chunk in rows.chunks(rows_per_stmt) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO \"{schema}\".\"{table}\" ({col_list}) "
            ));
            qb.push_values(chunk, |mut b, row| {
                for cell in row {
                    match cell {
                        Value::Null => {
                            b.push("NULL");
                        }
                        Value::Bool(x) => {
                            b.push_bind(*x);
                        }
                        Value::Int(x) => {
                            b.push_bind(*x);
                        }
                        Value::Float(x) => {
                            b.push_bind(*x);
                        }
                        Value::Text(s) => {
                            b.push_bind(s.clone());
                        }
                        Value::Date(d) => {
                            b.push_bind(*d);
                        }
                        Value::DateTime(ts) => {
                            b.push_bind(*ts);
                        }
                    }
                }
            });
            qb.build().execute(&mut *tx).await.map_err(map_err)?;
        }
        tx.commit().await.map_err(map_err)?;
        Ok(())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, MigrationError> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{schema}\".\"{table}\""))
                .fetch_one(&self.pool)
                .await
                .map_err(map_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>, MigrationError> {
        let defs = self.table_columns(schema, table).await?;
        let select_list = columns
            .iter()
            .map(|name| {
                let ty = defs
                    .iter()
                    .find(|d| &d.name == name)
                    .map(|d| d.data_type)
                    .ok_or_else(|| {
                        MigrationError::internal(
                            "UNKNOWN_COLUMN",
                            format!("{schema}.{table} has no column {name}"),
                        )
                    })?;
                Ok((select_expr(name, ty), ty))
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;

        let sql = format!(
            "SELECT {} FROM \"{schema}\".\"{table}\"",
            select_list.iter().map(|(expr, _)| expr.clone()).collect::<Vec<_>>().join(", ")
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(map_err)?;
        rows.iter()
            .map(|row| {
                select_list
                    .iter()
                    .enumerate()
                    .map(|(i, (_, ty))| decode_cell(row, i, *ty))
                    .collect()
            })
            .collect()
    }

    async fn repoint_references(
        &self,
        schema: &str,
        dependents: &[(&str, &str)],
        from_id: i64,
        to_id: i64,
    ) -> Result<u64, MigrationError> {
        // One transaction across all dependents: a conflict in any of them
        // rolls the whole repoint back.
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let mut touched = 0u64;
        for (table, fk_column) in dependents {
            let done = sqlx::query(&format!(
                "UPDATE \"{schema}\".\"{table}\" SET \"{fk_column}\" = $1 \
                 WHERE \"{fk_column}\" = $2"
            ))
            .bind(to_id)
            .bind(from_id)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
            touched += done.rows_affected();
        }
        tx.commit().await.map_err(map_err)?;
        Ok(touched)
    }

    async fn delete_rows(
        &self,
        schema: &str,
        table: &str,
        pk_column: &str,
        ids: &[i64],
    ) -> Result<u64, MigrationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let done = sqlx::query(&format!(
            "DELETE FROM \"{schema}\".\"{table}\" WHERE \"{pk_column}\" = ANY($1)"
        ))
        .bind(ids.to_vec())
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(done.rows_affected())
    }

    async fn purge_soft_deleted(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<u64, MigrationError> {
        self.execute(&format!(
            "DELETE FROM \"{schema}\".\"{table}\" WHERE \"deleted_at\" IS NOT NULL"
        ))
        .await
    }

    async fn upsert_from_staging(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
        columns: &[String],
        has_updated_at: bool,
    ) -> Result<UpsertStats, MigrationError> {
        let pk = table.primary_key;
        let col_list = quoted_list(columns);
        let set_list = columns
            .iter()
            .filter(|c| c.as_str() != pk)
            .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");

        // An unchanged row performs no write: recency guard when the table
        // tracks update times, column-wise comparison otherwise.
        let guard = if has_updated_at {
            "EXCLUDED.\"updated_at\" IS NOT NULL AND \
             (dst.\"updated_at\" IS NULL OR EXCLUDED.\"updated_at\" > dst.\"updated_at\")"
                .to_string()
        } else {
            let dst_tuple = columns
                .iter()
                .filter(|c| c.as_str() != pk)
                .map(|c| format!("dst.\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            let src_tuple = columns
                .iter()
                .filter(|c| c.as_str() != pk)
                .map(|c| format!("EXCLUDED.\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({dst_tuple}) IS DISTINCT FROM ({src_tuple})")
        };

        let sql = format!(
            "INSERT INTO \"{target_schema}\".\"{table_name}\" AS dst ({col_list}) \
             SELECT {col_list} FROM \"{staging_schema}\".\"{table_name}\" \
             ON CONFLICT (\"{pk}\") DO UPDATE SET {set_list} WHERE {guard} \
             RETURNING (xmax = 0) AS inserted",
            table_name = table.name,
        );

        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let rows = sqlx::query(&sql).fetch_all(&mut *tx).await.map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;

        let mut stats = UpsertStats::default();
        for row in &rows {
            let inserted: bool = row.try_get(0).map_err(map_err)?;
            if inserted {
                stats.inserted += 1;
            } else {
                stats.updated += 1;
            }
        }
        Ok(stats)
    }

    async fn delete_missing(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
    ) -> Result<u64, MigrationError> {
        let pk = table.primary_key;
        self.execute(&format!(
            "DELETE FROM \"{target_schema}\".\"{table_name}\" dst \
             WHERE NOT EXISTS (SELECT 1 FROM \"{staging_schema}\".\"{table_name}\" src \
             WHERE src.\"{pk}\" = dst.\"{pk}\")",
            table_name = table.name,
        ))
        .await
    }
}

fn quoted_list(columns: &[String]) -> String {
    columns.iter().map(|c| format!("\"{c}\"")).collect::<Vec<_>>().join(", ")
}

/// Select expression that casts each column to the one wire type its
/// [`TargetType`] decodes from.
fn select_expr(name: &str, ty: TargetType) -> String {
    match ty {
        TargetType::SmallInt | TargetType::Integer | TargetType::BigInt => {
            format!("\"{name}\"::int8 AS \"{name}\"")
        }
        TargetType::Real => format!("\"{name}\"::float8 AS \"{name}\""),
        TargetType::Numeric => format!("\"{name}\"::text AS \"{name}\""),
        TargetType::Timestamp => format!("\"{name}\"::timestamp AS \"{name}\""),
        TargetType::Boolean | TargetType::Varchar | TargetType::Text | TargetType::Date => {
            format!("\"{name}\"")
        }
    }
}

fn decode_cell(row: &PgRow, idx: usize, ty: TargetType) -> Result<Value, MigrationError> {
    let value = match ty {
        TargetType::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Bool),
        TargetType::SmallInt | TargetType::Integer | TargetType::BigInt => row
            .try_get::<Option<i64>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Int),
        TargetType::Real => row
            .try_get::<Option<f64>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Float),
        TargetType::Numeric | TargetType::Varchar | TargetType::Text => row
            .try_get::<Option<String>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Text),
        TargetType::Date => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::Date),
        TargetType::Timestamp => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map_err(map_err)?
            .map_or(Value::Null, Value::DateTime),
    };
    Ok(value)
}

fn map_err(e: sqlx::Error) -> MigrationError {
    match &e {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some("23505") {
                MigrationError::data("UNIQUE_VIOLATION", db.message().to_string())
            } else {
                MigrationError::transient_db("TARGET_DB_ERROR", db.message().to_string())
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
            MigrationError::transient_network("TARGET_IO", e.to_string())
        }
        _ => MigrationError::internal("TARGET_DRIVER", e.to_string()),
    }
}
