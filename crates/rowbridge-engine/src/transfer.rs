//! Batch transfer engine: source pages through the conversion table into
//! staging shadow tables.
//!
//! Pagination is planned against the query budget before the first page is
//! pulled and re-checked after every page. When a plan would blow the
//! budget the engine re-plans once to fewer, larger batches; if the plan
//! still does not fit it fails fast. A partial migration must never look
//! complete.

use std::time::Instant;

use tracing::{debug, info, warn};

use rowbridge_types::error::MigrationError;
use rowbridge_types::normalize::{clean_text, first_name_case, last_name_case};
use rowbridge_types::value::{convert, Value};

use crate::budget::QueryBudget;
use crate::catalog::TableSpec;
use crate::config::{MigrationConfig, MAX_BATCH_SIZE};
use crate::result::TableStats;
use crate::store::{ColumnDef, SourceStore, TargetStore};

/// Moves one table from the source into its staging shadow table.
///
/// # Errors
///
/// Fails on budget exhaustion after one re-plan, on store failures, and
/// when the source and target share no columns. Per-row conversion errors
/// are logged and counted, never fatal.
pub async fn transfer_table<S: SourceStore, T: TargetStore>(
    source: &S,
    target: &T,
    budget: &QueryBudget,
    cfg: &MigrationConfig,
    table: &'static TableSpec,
) -> Result<TableStats, MigrationError> {
    let shared = shared_columns(source, target, cfg, table).await?;
    let column_names: Vec<String> = shared.iter().map(|c| c.name.clone()).collect();

    let total = source.count_rows(table.name).await?;
    let mut stats = TableStats { table: table.name.to_string(), source_rows: total, ..Default::default() };
    if total == 0 {
        return Ok(stats);
    }

    let mut batch = plan_batch_size(cfg.effective_batch_size(), total);
    let mut replanned = false;
    check_projection(budget, total, &mut batch, &mut replanned, table)?;
    stats.batch_size = batch;

    let mut offset = 0u64;
    while offset < total {
        let started = Instant::now();
        let page = source.fetch_page(table, &column_names, offset, batch).await?;
        let fetched = page.len() as u64;
        if fetched == 0 {
            break;
        }

        let mut staged = Vec::with_capacity(page.len());
        for row in page {
            match convert_row(row, &shared, table) {
                Ok(converted) => staged.push(converted),
                Err((err, pk)) => {
                    warn!(
                        table = table.name,
                        key = %pk,
                        error = %err,
                        "row skipped: conversion failed"
                    );
                    stats.skipped += 1;
                }
            }
        }

        let rows = staged.len() as u64;
        target
            .insert_batch(&cfg.staging_schema, table.name, &column_names, staged)
            .await?;
        stats.transferred += rows;
        stats.batches += 1;
        offset += fetched;

        info!(
            table = table.name,
            rows,
            offset,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch staged"
        );

        if offset < total {
            check_projection(budget, total - offset, &mut batch, &mut replanned, table)?;
        }
    }

    Ok(stats)
}

/// Adaptive batch size: at least the configured size, one tenth of the
/// table for large tables, never past the hard ceiling. A table that fits
/// in one batch moves in one query.
fn plan_batch_size(configured: u64, total: u64) -> u64 {
    if total <= configured {
        total
    } else {
        (total / 10).max(configured).min(MAX_BATCH_SIZE)
    }
}

/// Checks the remaining page count against the budget. On the first
/// overrun the plan is rebuilt with fewer, larger batches; a second
/// overrun is fatal.
fn check_projection(
    budget: &QueryBudget,
    remaining_rows: u64,
    batch: &mut u64,
    replanned: &mut bool,
    table: &TableSpec,
) -> Result<(), MigrationError> {
    let pages = remaining_rows.div_ceil((*batch).max(1));
    if !budget.would_exceed(pages) {
        return Ok(());
    }
    if !*replanned && *batch < MAX_BATCH_SIZE {
        *batch = (*batch * 2).min(MAX_BATCH_SIZE);
        *replanned = true;
        warn!(
            table = table.name,
            batch_size = *batch,
            "projected queries exceed budget; re-planning to larger batches"
        );
        let pages = remaining_rows.div_ceil(*batch);
        if !budget.would_exceed(pages) {
            return Ok(());
        }
    }
    Err(MigrationError::query_budget(
        "BUDGET_EXCEEDED",
        format!(
            "table {}: {} remaining rows need more queries than the budget allows \
             (used {}, ceiling {})",
            table.name,
            remaining_rows,
            budget.used(),
            budget.ceiling()
        ),
    ))
}

/// Converts one row through the type table and applies in-pass text
/// normalization. On failure returns the error plus the row key for the log.
fn convert_row(
    row: Vec<Value>,
    columns: &[ColumnDef],
    table: &TableSpec,
) -> Result<Vec<Value>, (MigrationError, Value)> {
    let key = columns
        .iter()
        .position(|c| c.name == table.primary_key)
        .and_then(|i| row.get(i).cloned())
        .unwrap_or(Value::Null);

    let mut out = Vec::with_capacity(row.len());
    for (cell, col) in row.into_iter().zip(columns) {
        let converted = convert(cell, col.data_type).map_err(|e| (e, key.clone()))?;
        out.push(normalize_cell(converted, &col.name, table));
    }
    Ok(out)
}

fn normalize_cell(value: Value, column: &str, table: &TableSpec) -> Value {
    let Value::Text(s) = value else { return value };

    if table.clean_columns.contains(&column) {
        return Value::Text(clean_text(&s));
    }
    if let Some(casing) = &table.name_casing {
        if column == casing.first_name_column {
            return Value::Text(first_name_case(&s));
        }
        if column == casing.last_name_column {
            return Value::Text(last_name_case(&s));
        }
    }
    Value::Text(s)
}

/// Target columns also present on the source, in target order. Columns the
/// target expects but the source lacks are surfaced in the log.
async fn shared_columns<S: SourceStore, T: TargetStore>(
    source: &S,
    target: &T,
    cfg: &MigrationConfig,
    table: &TableSpec,
) -> Result<Vec<ColumnDef>, MigrationError> {
    let target_cols = target.table_columns(&cfg.target_schema, table.name).await?;
    let source_cols = source.column_names(table.name).await?;

    let mut shared = Vec::with_capacity(target_cols.len());
    for col in target_cols {
        if source_cols.contains(&col.name) {
            shared.push(col);
        } else {
            warn!(table = table.name, column = %col.name, "target column missing on source");
        }
    }
    for col in &source_cols {
        if !shared.iter().any(|c| &c.name == col) {
            debug!(table = table.name, column = %col, "source column not migrated");
        }
    }

    if shared.is_empty() {
        return Err(MigrationError::internal(
            "NO_SHARED_COLUMNS",
            format!("table {} shares no columns between source and target", table.name),
        ));
    }
    Ok(shared)
}
