//! Single-table storage.
//!
//! Every record the service persists lives in one physical table keyed by a
//! `(pk, sk)` pair. Three secondary indexes re-project items under alternate
//! keys (see [`Index`]). Writes go through [`Table::transact_write`], which
//! commits a list of conditional operations all-or-nothing.

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryTable;
pub use postgres::{DbConfig, PgTable};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Attribute map carried by an item. Index attributes live alongside data.
pub type Attributes = Map<String, Value>;

pub const GSI1_PK: &str = "GSI1PK";
pub const GSI1_SK: &str = "GSI1SK";
pub const GSI2_PK: &str = "GSI2PK";
pub const GSI2_SK: &str = "GSI2SK";
pub const ENTITY_TYPE: &str = "EntityType";
pub const TYPE_SK: &str = "TypeSK";

/// Transaction size ceiling shared by the backends.
pub const DEFAULT_MAX_TRANSACTION_ITEMS: usize = 100;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.pk, self.sk)
    }
}

/// A stored item: its key plus an attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: Key,
    pub attributes: Attributes,
}

impl Item {
    pub fn new(key: Key, attributes: Attributes) -> Self {
        Self { key, attributes }
    }

    /// String value of an attribute, if present and a string.
    pub fn str_attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// Guard evaluated against the item currently stored at an operation's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    None,
    /// The key must already hold an item.
    Exists,
    /// The key must be free.
    NotExists,
}

impl Condition {
    pub fn holds(self, present: bool) -> bool {
        match self {
            Condition::None => true,
            Condition::Exists => present,
            Condition::NotExists => !present,
        }
    }
}

/// One operation inside an atomic write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Replace the whole item.
    Put { item: Item, condition: Condition },
    /// Merge `set` into the existing item. A missing item fails the
    /// transaction regardless of `condition`.
    Update {
        key: Key,
        set: Attributes,
        condition: Condition,
    },
    Delete { key: Key, condition: Condition },
    /// Evaluate `condition` without writing anything.
    Check { key: Key, condition: Condition },
}

impl WriteOp {
    pub fn put(item: Item, condition: Condition) -> Self {
        WriteOp::Put { item, condition }
    }

    pub fn delete(key: Key, condition: Condition) -> Self {
        WriteOp::Delete { key, condition }
    }

    pub fn check(key: Key, condition: Condition) -> Self {
        WriteOp::Check { key, condition }
    }

    pub fn key(&self) -> &Key {
        match self {
            WriteOp::Put { item, .. } => &item.key,
            WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } | WriteOp::Check { key, .. } => {
                key
            }
        }
    }

    pub fn condition(&self) -> Condition {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Update { condition, .. }
            | WriteOp::Delete { condition, .. }
            | WriteOp::Check { condition, .. } => *condition,
        }
    }
}

/// Secondary indexes of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// Posts grouped by author, sorted by creation time.
    ByAuthor,
    /// Posts grouped by category, sorted by creation time.
    ByCategory,
    /// Every primary record grouped by its entity tag.
    ByType,
}

impl Index {
    pub const fn partition_attribute(self) -> &'static str {
        match self {
            Index::ByAuthor => GSI1_PK,
            Index::ByCategory => GSI2_PK,
            Index::ByType => ENTITY_TYPE,
        }
    }

    pub const fn sort_attribute(self) -> &'static str {
        match self {
            Index::ByAuthor => GSI1_SK,
            Index::ByCategory => GSI2_SK,
            Index::ByType => TYPE_SK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub index: Index,
    pub partition: String,
    pub descending: bool,
}

impl IndexQuery {
    pub fn new(index: Index, partition: impl Into<String>) -> Self {
        Self {
            index,
            partition: partition.into(),
            descending: false,
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// The wide-column table the repository runs on.
///
/// Implementations must make `transact_write` atomic: either every operation
/// is applied or none is. When a condition fails the returned error is
/// [`StoreError::ConditionFailed`] carrying the index of the first failing op.
#[async_trait]
pub trait Table: Send + Sync + 'static {
    async fn get(&self, key: &Key) -> StoreResult<Option<Item>>;

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// All items under `query.partition` in the chosen index, ordered by the
    /// index sort attribute (ties broken by primary key).
    async fn query(&self, query: &IndexQuery) -> StoreResult<Vec<Item>>;

    /// Round-trip latency to the backend.
    async fn health_check(&self) -> StoreResult<Duration>;

    fn max_transaction_items(&self) -> usize {
        DEFAULT_MAX_TRANSACTION_ITEMS
    }

    async fn put(&self, item: Item, condition: Condition) -> StoreResult<()> {
        self.transact_write(vec![WriteOp::put(item, condition)]).await
    }

    async fn update(&self, key: Key, set: Attributes, condition: Condition) -> StoreResult<()> {
        self.transact_write(vec![WriteOp::Update {
            key,
            set,
            condition,
        }])
        .await
    }

    async fn delete(&self, key: Key, condition: Condition) -> StoreResult<()> {
        self.transact_write(vec![WriteOp::delete(key, condition)]).await
    }
}

/// Rejects transactions the backend would refuse anyway.
pub(crate) fn check_transaction_size(ops: &[WriteOp], limit: usize) -> StoreResult<()> {
    if ops.is_empty() {
        return Err(StoreError::EmptyTransaction);
    }
    if ops.len() > limit {
        return Err(StoreError::TooManyItems {
            requested: ops.len(),
            limit,
        });
    }
    Ok(())
}
