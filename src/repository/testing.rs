//! Fault injection and interleaving helpers for repository tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::db::{IndexQuery, Item, Key, StoreError, StoreResult, Table, WriteOp};

/// Delegates to an inner table, failing one chosen `transact_write` call
/// and optionally every health check.
pub struct FailingTable {
    inner: Arc<dyn Table>,
    calls: AtomicUsize,
    fail_on: usize,
    unhealthy: bool,
}

impl FailingTable {
    pub fn new(inner: Arc<dyn Table>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            fail_on: 0,
            unhealthy: false,
        }
    }

    /// Fails the `n`th transaction, counting from 1.
    pub fn fail_transaction(mut self, n: usize) -> Self {
        self.fail_on = n;
        self
    }

    pub fn fail_health_check(mut self) -> Self {
        self.unhealthy = true;
        self
    }
}

#[async_trait]
impl Table for FailingTable {
    async fn get(&self, key: &Key) -> StoreResult<Option<Item>> {
        self.inner.get(key).await
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.transact_write(ops).await
    }

    async fn query(&self, query: &IndexQuery) -> StoreResult<Vec<Item>> {
        self.inner.query(query).await
    }

    async fn health_check(&self) -> StoreResult<Duration> {
        if self.unhealthy {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        self.inner.health_check().await
    }

    fn max_transaction_items(&self) -> usize {
        self.inner.max_transaction_items()
    }
}

/// Delegates to an inner table but yields to the scheduler after every read,
/// so futures joined with `tokio::join!` interleave their read-then-write
/// sequences.
pub struct YieldingTable {
    inner: Arc<dyn Table>,
}

impl YieldingTable {
    pub fn new(inner: Arc<dyn Table>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Table for YieldingTable {
    async fn get(&self, key: &Key) -> StoreResult<Option<Item>> {
        let item = self.inner.get(key).await;
        tokio::task::yield_now().await;
        item
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.inner.transact_write(ops).await
    }

    async fn query(&self, query: &IndexQuery) -> StoreResult<Vec<Item>> {
        let items = self.inner.query(query).await;
        tokio::task::yield_now().await;
        items
    }

    async fn health_check(&self) -> StoreResult<Duration> {
        self.inner.health_check().await
    }

    fn max_transaction_items(&self) -> usize {
        self.inner.max_transaction_items()
    }
}
