//! Source query budget and client-side query metrics.
//!
//! The budget is the run-wide counter of source round trips against a
//! configured ceiling. It is an explicit, injectable component (never a
//! process global) so tests can substitute deterministic instances and two
//! runs in one process cannot interfere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rowbridge_types::error::MigrationError;

const SLOW_QUERY_REPORT_CAP: usize = 20;

/// Run-wide counter of source database round trips.
#[derive(Debug)]
pub struct QueryBudget {
    used: AtomicU64,
    ceiling: u64,
}

impl QueryBudget {
    #[must_use]
    pub fn new(ceiling: u64) -> Self {
        Self { used: AtomicU64::new(0), ceiling }
    }

    /// Records one issued query.
    pub fn charge(&self) {
        self.used.fetch_add(1, Ordering::Relaxed);
    }

    /// Queries issued so far.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Whether issuing `projected` more queries would pass the ceiling.
    #[must_use]
    pub fn would_exceed(&self, projected: u64) -> bool {
        self.used().saturating_add(projected) > self.ceiling
    }

    /// Fails if `projected` more queries would pass the ceiling.
    ///
    /// # Errors
    ///
    /// Returns a `QueryBudget` error carrying used/projected/ceiling
    /// figures; the transfer engine must re-plan or abort rather than issue
    /// the queries.
    pub fn check(&self, projected: u64) -> Result<(), MigrationError> {
        if self.would_exceed(projected) {
            return Err(MigrationError::query_budget(
                "BUDGET_EXCEEDED",
                format!(
                    "projected {} more queries would exceed ceiling {} (used {})",
                    projected,
                    self.ceiling,
                    self.used()
                ),
            ));
        }
        Ok(())
    }
}

/// One slow query retained for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SlowQuery {
    pub op: String,
    pub duration_ms: u64,
    pub sql: String,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_queries: u64,
    total_ms: u64,
    slow: Vec<SlowQuery>,
}

/// Client-side impact metrics for the source database (read-only).
///
/// Counts queries and total time, and keeps the first few queries slower
/// than the configured threshold.
#[derive(Debug)]
pub struct QueryMetrics {
    slow_ms: u64,
    inner: Mutex<MetricsInner>,
}

impl QueryMetrics {
    #[must_use]
    pub fn new(slow_ms: u64) -> Self {
        Self { slow_ms, inner: Mutex::new(MetricsInner::default()) }
    }

    /// Records a single query execution.
    pub fn record(&self, op: &str, sql: &str, duration: Duration) {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut inner = self.inner.lock().expect("metrics lock");
        inner.total_queries += 1;
        inner.total_ms += duration_ms;
        if duration_ms >= self.slow_ms && inner.slow.len() < SLOW_QUERY_REPORT_CAP {
            inner.slow.push(SlowQuery {
                op: op.to_string(),
                duration_ms,
                sql: shorten(sql, 500),
            });
            tracing::info!(op, duration_ms, "slow source query");
        }
    }

    /// Summary for the end-of-run log line.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().expect("metrics lock");
        let avg_ms = if inner.total_queries == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                inner.total_ms as f64 / inner.total_queries as f64
            }
        };
        MetricsSummary {
            total_queries: inner.total_queries,
            total_ms: inner.total_ms,
            avg_ms_per_query: avg_ms,
            slow_queries: inner.slow.clone(),
        }
    }
}

/// Aggregated query metrics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSummary {
    pub total_queries: u64,
    pub total_ms: u64,
    pub avg_ms_per_query: f64,
    pub slow_queries: Vec<SlowQuery>,
}

fn shorten(sql: &str, max_len: usize) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > max_len {
        format!("{}...", &flat[..max_len - 3])
    } else {
        flat
    }
}
