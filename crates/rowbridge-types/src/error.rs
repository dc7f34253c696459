//! Structured error model for migration operations.
//!
//! [`MigrationError`] carries classification, retry metadata, and optional
//! diagnostic details. Construct via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a migration error.
///
/// Determines default retry behavior and operator-facing categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid or missing configuration.
    Config,
    /// A stale staging schema from an earlier run is in the way.
    SchemaConflict,
    /// The run would exceed its source query budget.
    QueryBudget,
    /// A source value has no mapping to the declared target type.
    Conversion,
    /// Rate limit exceeded (retryable).
    RateLimit,
    /// Transient network error (retryable).
    TransientNetwork,
    /// Transient database error (retryable).
    TransientDb,
    /// Invalid or corrupt data.
    Data,
    /// Internal engine error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::SchemaConflict => "schema_conflict",
            Self::QueryBudget => "query_budget",
            Self::Conversion => "conversion",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Data => "data",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Affects the entire run.
    Run,
    /// Affects one table.
    Table,
    /// Affects a single batch.
    Batch,
    /// Affects an individual row.
    Row,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Run => "run",
            Self::Table => "table",
            Self::Batch => "batch",
            Self::Row => "row",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Minute-scale retry.
    Slow,
}

/// Structured error from a migration operation.
///
/// Carries classification, retry metadata, and optional diagnostic details.
/// Construct via category-specific factory methods (e.g., [`MigrationError::config`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct MigrationError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MigrationError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Configuration error (not retryable, fatal before any phase starts).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Stale staging schema conflict (not retryable).
    #[must_use]
    pub fn schema_conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::SchemaConflict, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Query budget exhaustion (not retryable, table scope).
    #[must_use]
    pub fn query_budget(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::QueryBudget, ErrorScope::Table, false, BackoffClass::Normal, code, message)
    }

    /// Unmapped or failed type conversion (not retryable, row scope).
    #[must_use]
    pub fn conversion(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conversion, ErrorScope::Row, false, BackoffClass::Normal, code, message)
    }

    /// Rate limit error (retryable, slow backoff).
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(
            ErrorCategory::RateLimit, ErrorScope::Run, true, BackoffClass::Slow, code, message,
        );
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Transient network error (retryable, normal backoff).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, ErrorScope::Run, true, BackoffClass::Normal, code, message)
    }

    /// Transient database error (retryable, normal backoff).
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, ErrorScope::Run, true, BackoffClass::Normal, code, message)
    }

    /// Data validation error (not retryable, row scope).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, ErrorScope::Row, false, BackoffClass::Normal, code, message)
    }

    /// Internal engine error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Run, false, BackoffClass::Normal, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }
}
