//! Run outcome types: per-phase statistics and the final run summary.

use serde::{Deserialize, Serialize};

/// Orchestrator state. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Migrating,
    Cleaning,
    Syncing,
    Done,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Migrating => "MIGRATING",
            Self::Cleaning => "CLEANING",
            Self::Syncing => "SYNCING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Per-table transfer statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: String,
    pub source_rows: u64,
    pub transferred: u64,
    /// Rows dropped by per-row conversion errors. Non-zero skips must be
    /// visible in the final report; silent loss is the worst outcome.
    pub skipped: u64,
    pub batches: u64,
    pub batch_size: u64,
}

/// One merge that could not be completed because repointing would violate a
/// uniqueness constraint. The rows are left unmodified for human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousMerge {
    pub table: String,
    pub canonical_id: i64,
    pub duplicate_id: i64,
    pub detail: String,
}

/// Per-table cleanup statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub table: String,
    pub duplicate_groups: u64,
    pub rows_merged: u64,
    pub references_repointed: u64,
    pub soft_deleted_purged: u64,
    pub ambiguous: Vec<AmbiguousMerge>,
}

/// Per-table sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub table: String,
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

/// Enrichment outcome tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub confirmed: u64,
    pub not_in_registry: u64,
    pub corrected: u64,
    pub invalid_no_correction: u64,
    pub lookup_errors: u64,
}

/// Final run summary, emitted as one structured JSON log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub state: RunState,
    pub dry_run: bool,
    pub tables: Vec<TableStats>,
    pub merges: Vec<MergeReport>,
    pub syncs: Vec<SyncCounts>,
    pub enrichment: Option<EnrichmentStats>,
    pub queries_used: u64,
    pub query_budget: u64,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Total rows skipped across all tables.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_uppercase() {
        assert_eq!(RunState::Migrating.to_string(), "MIGRATING");
        assert_eq!(RunState::Failed.to_string(), "FAILED");
    }

    #[test]
    fn summary_serializes() {
        let summary = RunSummary {
            state: RunState::Done,
            dry_run: false,
            tables: vec![TableStats { table: "company".into(), skipped: 3, ..Default::default() }],
            merges: vec![],
            syncs: vec![],
            enrichment: None,
            queries_used: 42,
            query_budget: 5000,
            elapsed_ms: 1234,
        };
        assert_eq!(summary.total_skipped(), 3);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"state\":\"done\""));
        assert!(json.contains("\"queries_used\":42"));
    }
}
