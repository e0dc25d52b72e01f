//! Repository facade over the single table.
//!
//! Handlers only ever talk to [`Repository`]. Each entity operation lives in
//! its own submodule as an inherent `impl Repository` block.

mod batch;
mod categories;
pub mod index;
mod posts;
#[cfg(test)]
pub(crate) mod testing;
pub mod uniqueness;
mod users;

use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::db::{Index, IndexQuery, Key, StoreError, Table};
use crate::domain::{Category, User, UNCATEGORIZED_NAME, UNCATEGORIZED_SLUG};
use crate::error::{RepoError, RepoResult};

pub use posts::PostPage;
pub use users::hash_refresh_token;

use index::from_item;

/// Cheap to clone; all clones share one table handle.
#[derive(Clone)]
pub struct Repository {
    table: Arc<dyn Table>,
}

/// Administrator account created at startup when absent.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl Repository {
    pub fn new(table: Arc<dyn Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<dyn Table> {
        &self.table
    }

    /// Creates the protected `uncategorized` category and, when given, the
    /// admin account. Safe to call on every start.
    pub async fn seed(&self, admin: Option<AdminSeed>) -> RepoResult<()> {
        let mut category = Category::new(UNCATEGORIZED_NAME, "Posts without a category");
        category.slug = UNCATEGORIZED_SLUG.to_string();
        match self.create_category(category).await {
            Ok(_) => tracing::info!(slug = UNCATEGORIZED_SLUG, "seeded default category"),
            Err(RepoError::Conflict(_)) => {
                tracing::debug!(slug = UNCATEGORIZED_SLUG, "default category already present")
            }
            Err(e) => return Err(e),
        }

        if let Some(admin) = admin {
            let mut user = User::new(admin.username, admin.email, admin.password_hash);
            user.role = crate::domain::Role::Admin;
            let username = user.username.clone();
            match self.create_user(user).await {
                Ok(_) => tracing::info!(username = %username, "seeded admin user"),
                Err(RepoError::Conflict(_)) => {
                    tracing::debug!(username = %username, "admin user already present")
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Fetches and decodes one record, `None` when absent.
    async fn load<R: DeserializeOwned>(
        &self,
        key: &Key,
        operation: &'static str,
        id: &str,
    ) -> RepoResult<Option<R>> {
        let item = self
            .table
            .get(key)
            .await
            .map_err(|e| RepoError::storage(operation, id, e))?;
        item.map(from_item)
            .transpose()
            .map_err(|e| RepoError::storage(operation, id, e))
    }

    async fn exists(&self, key: &Key, operation: &'static str, id: &str) -> RepoResult<bool> {
        self.table
            .get(key)
            .await
            .map(|item| item.is_some())
            .map_err(|e| RepoError::storage(operation, id, e))
    }

    async fn list<R: DeserializeOwned>(
        &self,
        index: Index,
        partition: String,
        descending: bool,
        operation: &'static str,
    ) -> RepoResult<Vec<R>> {
        let mut query = IndexQuery::new(index, partition);
        if descending {
            query = query.descending();
        }
        let items = self
            .table
            .query(&query)
            .await
            .map_err(|e| RepoError::storage(operation, &query.partition, e))?;
        items
            .into_iter()
            .map(from_item)
            .collect::<Result<Vec<R>, _>>()
            .map_err(|e| RepoError::storage(operation, &query.partition, e))
    }
}

/// Translates a cancelled transaction into a domain error via `on_condition`,
/// which receives the index of the failing op. Anything it declines, and every
/// other backend error, becomes `Storage`.
fn map_write_error(
    err: StoreError,
    operation: &'static str,
    id: &str,
    on_condition: impl FnOnce(usize) -> Option<RepoError>,
) -> RepoError {
    match err.failed_condition().and_then(on_condition) {
        Some(mapped) => {
            tracing::debug!(operation, id, error = %mapped, "write rejected by condition");
            mapped
        }
        None => RepoError::storage(operation, id, err),
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}
