//! Deletes that may exceed one transaction.
//!
//! Groups are packed into transactions of at most
//! [`Table::max_transaction_items`] operations. A group never straddles two
//! transactions, so a post and its slug claim always disappear together.
//! Batches commit independently: once one fails, the later batches are not
//! attempted and earlier ones stay committed.

use crate::db::{Table, WriteOp};
use crate::error::{BatchDeleteReport, FailedDelete, RepoError, RepoResult};

/// Operations that retire one logical record.
#[derive(Debug)]
pub struct DeleteGroup {
    pub id: String,
    pub ops: Vec<WriteOp>,
}

impl DeleteGroup {
    pub fn new(id: impl Into<String>, ops: Vec<WriteOp>) -> Self {
        Self { id: id.into(), ops }
    }
}

struct Batch {
    ids: Vec<String>,
    ops: Vec<WriteOp>,
}

fn pack(groups: Vec<DeleteGroup>, limit: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch {
        ids: Vec::new(),
        ops: Vec::new(),
    };

    for group in groups {
        if !current.ops.is_empty() && current.ops.len() + group.ops.len() > limit {
            batches.push(std::mem::replace(
                &mut current,
                Batch {
                    ids: Vec::new(),
                    ops: Vec::new(),
                },
            ));
        }
        current.ids.push(group.id);
        current.ops.extend(group.ops);
    }

    if !current.ops.is_empty() {
        batches.push(current);
    }
    batches
}

/// Runs `groups` in order.
///
/// Returns the report when every batch committed, a `Storage` error when the
/// first batch failed (nothing was deleted), and `PartialFailure` otherwise.
pub async fn delete_in_batches(
    table: &dyn Table,
    operation: &'static str,
    groups: Vec<DeleteGroup>,
) -> RepoResult<BatchDeleteReport> {
    let batches = pack(groups, table.max_transaction_items());
    let total = batches.len();
    let mut report = BatchDeleteReport::default();
    let mut first_error = None;

    for (number, batch) in batches.into_iter().enumerate() {
        if first_error.is_some() {
            report
                .failed
                .extend(batch.ids.into_iter().map(|id| FailedDelete {
                    id,
                    reason: "not attempted after an earlier batch failed".into(),
                }));
            continue;
        }

        match table.transact_write(batch.ops).await {
            Ok(()) => {
                tracing::debug!(operation, batch = number + 1, total, "delete batch committed");
                report.deleted.extend(batch.ids);
            }
            Err(err) => {
                tracing::warn!(
                    operation,
                    batch = number + 1,
                    total,
                    error = %err,
                    "delete batch failed"
                );
                report
                    .failed
                    .extend(batch.ids.iter().cloned().map(|id| FailedDelete {
                        id,
                        reason: err.to_string(),
                    }));
                first_error = Some((batch.ids.into_iter().next().unwrap_or_default(), err));
            }
        }
    }

    match first_error {
        None => {
            tracing::info!(operation, deleted = report.deleted.len(), "batch delete complete");
            Ok(report)
        }
        Some((id, err)) if report.deleted.is_empty() => Err(RepoError::storage(operation, id, err)),
        Some(_) => {
            tracing::error!(
                operation,
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "batch delete stopped partway"
            );
            Err(RepoError::PartialFailure(report))
        }
    }
}
