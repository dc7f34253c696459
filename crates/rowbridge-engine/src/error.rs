//! Pipeline error model and retry backoff policy helpers.

use std::time::Duration;

use thiserror::Error;

use rowbridge_types::error::{BackoffClass, MigrationError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Categorized pipeline error for retry decisions.
///
/// `Migration` wraps a typed [`MigrationError`] with retry metadata
/// (`retryable`, `backoff_class`, `retry_after_ms`).
///
/// `Infrastructure` wraps opaque host-side errors (pool construction,
/// filesystem issues for report files, etc.) that are never retryable.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Typed migration error with retry metadata.
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// Infrastructure error (connection pool, filesystem, etc.)
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns `true` if this is a typed error marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Migration(e) => e.retryable,
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed migration error if this is a `Migration` variant.
    #[must_use]
    pub fn as_migration_error(&self) -> Option<&MigrationError> {
        match self {
            Self::Migration(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }
}

/// Compute retry delay based on error hints and attempt number.
#[must_use]
pub fn compute_backoff(err: &MigrationError, attempt: u32) -> Duration {
    // Honor an explicit retry_after from the server if present
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let delay_ms = base_ms.saturating_mul(2u64.pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}
