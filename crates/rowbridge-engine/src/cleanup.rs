//! Cleanup phase: duplicate merging and soft-delete purging, all inside the
//! staging schema.
//!
//! Merging is deterministic (groups walked in key order, one fixed
//! canonical-row rule) and idempotent: a second pass over already-cleaned
//! staging data finds nothing to do. A merge that would violate a
//! uniqueness constraint in any dependent table is flagged and left
//! entirely unmodified; human review is required and must not block the
//! batch.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use rowbridge_types::error::{ErrorCategory, MigrationError};
use rowbridge_types::normalize::company_name_key;
use rowbridge_types::value::Value;

use crate::catalog::{dependents_of, TableSpec};
use crate::config::MigrationConfig;
use crate::result::{AmbiguousMerge, MergeReport};
use crate::store::TargetStore;

/// Runs cleanup for every table that has a dedup rule or soft deletes.
///
/// # Errors
///
/// Propagates store failures. Ambiguous merges are report entries, never
/// errors.
pub async fn run_cleanup<T: TargetStore>(
    target: &T,
    cfg: &MigrationConfig,
    tables: &[&'static TableSpec],
) -> Result<Vec<MergeReport>, MigrationError> {
    let mut reports = Vec::new();
    for table in tables {
        if table.dedup.is_none() && !table.soft_delete {
            continue;
        }
        let mut report = MergeReport { table: table.name.to_string(), ..Default::default() };

        if table.soft_delete {
            report.soft_deleted_purged =
                target.purge_soft_deleted(&cfg.staging_schema, table.name).await?;
        }
        if table.dedup.is_some() {
            dedup_table(target, cfg, table, &mut report).await?;
        }

        info!(
            table = table.name,
            groups = report.duplicate_groups,
            merged = report.rows_merged,
            purged = report.soft_deleted_purged,
            ambiguous = report.ambiguous.len(),
            "cleanup finished"
        );
        reports.push(report);
    }
    Ok(reports)
}

struct StagedRow {
    pk: i64,
    non_null: usize,
    updated_at: Option<NaiveDateTime>,
}

async fn dedup_table<T: TargetStore>(
    target: &T,
    cfg: &MigrationConfig,
    table: &'static TableSpec,
    report: &mut MergeReport,
) -> Result<(), MigrationError> {
    let Some(spec) = table.dedup else { return Ok(()) };
    let columns: Vec<String> = target
        .table_columns(&cfg.staging_schema, table.name)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let rows = target.fetch_rows(&cfg.staging_schema, table.name, &columns).await?;

    let idx_of = |name: &str| columns.iter().position(|c| c == name);
    let Some(pk_idx) = idx_of(table.primary_key) else {
        return Err(MigrationError::internal(
            "MISSING_PK",
            format!("staging {} lacks column {}", table.name, table.primary_key),
        ));
    };
    let Some(name_idx) = idx_of(spec.name_column) else {
        return Ok(());
    };
    let locality_idx = idx_of(spec.locality_column);
    let updated_idx = idx_of("updated_at");

    // Group by normalized name plus locality code.
    let mut groups: BTreeMap<(String, String), Vec<StagedRow>> = BTreeMap::new();
    for row in &rows {
        let Some(Value::Int(pk)) = row.get(pk_idx) else { continue };
        let Some(Value::Text(name)) = row.get(name_idx) else { continue };
        let key_name = company_name_key(name);
        if key_name.is_empty() {
            continue;
        }
        let locality = match locality_idx.and_then(|i| row.get(i)) {
            Some(Value::Text(code)) => code.clone(),
            _ => String::new(),
        };
        let updated_at = match updated_idx.and_then(|i| row.get(i)) {
            Some(Value::DateTime(ts)) => Some(*ts),
            _ => None,
        };
        groups.entry((key_name, locality)).or_default().push(StagedRow {
            pk: *pk,
            non_null: row.iter().filter(|v| !v.is_null()).count(),
            updated_at,
        });
    }

    let dependents: Vec<(&str, &str)> =
        dependents_of(table.name).into_iter().map(|(dep, fk)| (dep.name, fk)).collect();
    let mut to_delete = Vec::new();

    for ((key_name, locality), mut group) in groups {
        if group.len() < 2 {
            continue;
        }
        report.duplicate_groups += 1;
        let canonical_idx = choose_canonical(&group);
        let canonical = group.remove(canonical_idx);

        // All of a duplicate's dependents repoint in one transaction; a
        // blocked merge leaves every reference where it was.
        for dup in group {
            match target
                .repoint_references(&cfg.staging_schema, &dependents, dup.pk, canonical.pk)
                .await
            {
                Ok(n) => {
                    report.references_repointed += n;
                    report.rows_merged += 1;
                    to_delete.push(dup.pk);
                }
                Err(e) if e.category == ErrorCategory::Data && e.code == "UNIQUE_VIOLATION" => {
                    warn!(
                        table = table.name,
                        duplicate = dup.pk,
                        canonical = canonical.pk,
                        "merge blocked by uniqueness constraint; rows left for review"
                    );
                    report.ambiguous.push(AmbiguousMerge {
                        table: table.name.to_string(),
                        canonical_id: canonical.pk,
                        duplicate_id: dup.pk,
                        detail: format!(
                            "repointing dependents ({key_name}/{locality}): {}",
                            e.message
                        ),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    if !to_delete.is_empty() {
        target
            .delete_rows(&cfg.staging_schema, table.name, table.primary_key, &to_delete)
            .await?;
    }
    Ok(())
}

/// Index of the canonical row in a duplicate group: most non-null
/// attributes, then newest `updated_at`, then lowest primary key.
fn choose_canonical(group: &[StagedRow]) -> usize {
    let mut best = 0;
    for (i, row) in group.iter().enumerate().skip(1) {
        let b = &group[best];
        let ordering = row
            .non_null
            .cmp(&b.non_null)
            .then_with(|| row.updated_at.cmp(&b.updated_at))
            .then_with(|| b.pk.cmp(&row.pk));
        if ordering == std::cmp::Ordering::Greater {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(pk: i64, non_null: usize, day: Option<u32>) -> StagedRow {
        StagedRow {
            pk,
            non_null,
            updated_at: day.map(|d| {
                NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
            }),
        }
    }

    #[test]
    fn canonical_prefers_most_complete_row() {
        let group = vec![row(1, 3, Some(9)), row(2, 5, Some(1)), row(3, 4, Some(9))];
        assert_eq!(choose_canonical(&group), 1);
    }

    #[test]
    fn canonical_breaks_ties_by_recency_then_lowest_pk() {
        let group = vec![row(7, 4, Some(1)), row(5, 4, Some(9)), row(2, 4, Some(9))];
        assert_eq!(group[choose_canonical(&group)].pk, 2);
    }

    #[test]
    fn canonical_treats_missing_updated_at_as_oldest() {
        let group = vec![row(1, 4, None), row(2, 4, Some(3))];
        assert_eq!(group[choose_canonical(&group)].pk, 2);
    }
}
