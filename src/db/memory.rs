use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{
    check_transaction_size, Attributes, IndexQuery, Item, Key, StoreError, StoreResult, Table,
    WriteOp, DEFAULT_MAX_TRANSACTION_ITEMS,
};

/// In-process table used by tests and by `TABLE_BACKEND=memory`.
///
/// A transaction holds the write lock for its whole duration, so concurrent
/// transactions are serialised and conditions are evaluated against a stable
/// snapshot.
pub struct InMemoryTable {
    items: RwLock<BTreeMap<Key, Attributes>>,
    max_transaction_items: usize,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::with_transaction_limit(DEFAULT_MAX_TRANSACTION_ITEMS)
    }

    /// Table with a custom per-transaction item ceiling.
    pub fn with_transaction_limit(limit: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            max_transaction_items: limit.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Every key currently stored, in key order.
    pub async fn keys(&self) -> Vec<Key> {
        self.items.read().await.keys().cloned().collect()
    }
}

impl Default for InMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_value<'a>(attributes: &'a Attributes, name: &str) -> &'a str {
    attributes.get(name).and_then(|v| v.as_str()).unwrap_or("")
}

#[async_trait]
impl Table for InMemoryTable {
    async fn get(&self, key: &Key) -> StoreResult<Option<Item>> {
        let items = self.items.read().await;
        Ok(items
            .get(key)
            .map(|attributes| Item::new(key.clone(), attributes.clone())))
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        check_transaction_size(&ops, self.max_transaction_items)?;

        let mut items = self.items.write().await;

        for (index, op) in ops.iter().enumerate() {
            let present = items.contains_key(op.key());
            let update_target_missing = matches!(op, WriteOp::Update { .. }) && !present;
            if !op.condition().holds(present) || update_target_missing {
                tracing::debug!(index, key = %op.key(), "transaction cancelled by condition");
                return Err(StoreError::ConditionFailed {
                    index,
                    key: op.key().to_string(),
                });
            }
        }

        for op in ops {
            match op {
                WriteOp::Put { item, .. } => {
                    items.insert(item.key, item.attributes);
                }
                WriteOp::Update { key, set, .. } => {
                    if let Some(existing) = items.get_mut(&key) {
                        existing.extend(set);
                    }
                }
                WriteOp::Delete { key, .. } => {
                    items.remove(&key);
                }
                WriteOp::Check { .. } => {}
            }
        }

        Ok(())
    }

    async fn query(&self, query: &IndexQuery) -> StoreResult<Vec<Item>> {
        let partition_attr = query.index.partition_attribute();
        let sort_attr = query.index.sort_attribute();

        let items = self.items.read().await;
        let mut matched: Vec<Item> = items
            .iter()
            .filter(|(_, attributes)| {
                attributes.get(partition_attr).and_then(|v| v.as_str())
                    == Some(query.partition.as_str())
            })
            .map(|(key, attributes)| Item::new(key.clone(), attributes.clone()))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = sort_value(&a.attributes, sort_attr)
                .cmp(sort_value(&b.attributes, sort_attr))
                .then_with(|| a.key.cmp(&b.key));
            if query.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        Ok(matched)
    }

    async fn health_check(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        let _ = self.items.read().await.len();
        Ok(start.elapsed())
    }

    fn max_transaction_items(&self) -> usize {
        self.max_transaction_items
    }
}

impl std::fmt::Debug for InMemoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTable")
            .field("max_transaction_items", &self.max_transaction_items)
            .finish_non_exhaustive()
    }
}
