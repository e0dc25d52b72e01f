//! Repository error taxonomy.
//!
//! Every repository operation returns [`RepoResult`]. Callers tell a
//! uniqueness violation apart from a transport failure by matching the
//! variant; no code inspects error text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::StoreError;

#[derive(Debug, Error)]
pub enum RepoError {
    /// Duplicate username/email/slug, or a delete that would orphan or remove
    /// a protected record.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Malformed input, rejected before any storage mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage failure during {operation} on '{id}': {source}")]
    Storage {
        operation: &'static str,
        id: String,
        #[source]
        source: StoreError,
    },

    /// A multi-batch delete stopped partway. Batches listed under `deleted`
    /// stay committed.
    #[error("batch delete incomplete: {} deleted, {} failed", .0.deleted.len(), .0.failed.len())]
    PartialFailure(BatchDeleteReport),
}

impl RepoError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        RepoError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Wraps a backend error and logs it with the operation and identifier.
    pub fn storage(operation: &'static str, id: impl Into<String>, source: StoreError) -> Self {
        let id = id.into();
        tracing::error!(operation, id = %id, error = %source, "storage failure");
        RepoError::Storage {
            operation,
            id,
            source,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Outcome of a delete that may span several transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteReport {
    /// Identifiers whose records were removed.
    pub deleted: Vec<String>,
    /// Identifiers left in place, with the reason.
    pub failed: Vec<FailedDelete>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelete {
    pub id: String,
    pub reason: String,
}

impl BatchDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message_counts_items() {
        let report = BatchDeleteReport {
            deleted: vec!["a".into(), "b".into()],
            failed: vec![FailedDelete {
                id: "c".into(),
                reason: "boom".into(),
            }],
        };
        let err = RepoError::PartialFailure(report);
        assert_eq!(
            err.to_string(),
            "batch delete incomplete: 2 deleted, 1 failed"
        );
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = BatchDeleteReport::default();
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"deleted":[],"failed":[]}"#);
        assert!(report.is_complete());
    }
}
