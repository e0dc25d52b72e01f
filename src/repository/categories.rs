use chrono::Utc;

use super::batch::{delete_in_batches, DeleteGroup};
use super::index::{category_key, to_item, CATEGORY_TYPE};
use super::uniqueness::Claim;
use super::{map_write_error, Repository};
use crate::db::{Condition, Index, WriteOp};
use crate::domain::{Category, UNCATEGORIZED_SLUG};
use crate::error::{BatchDeleteReport, RepoError, RepoResult};
use crate::slug::slugify;

fn name_slug(name: &str) -> RepoResult<String> {
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(RepoError::Validation(format!(
            "category name '{name}' must contain at least one letter or digit"
        )));
    }
    Ok(slug)
}

fn protected(slug: &str) -> RepoError {
    RepoError::Conflict(format!("category '{slug}' is protected"))
}

impl Repository {
    /// Creates a category keyed by the slug of its name. Names that slugify to
    /// an existing slug are rejected rather than suffixed.
    pub async fn create_category(&self, mut category: Category) -> RepoResult<Category> {
        category.name = category.name.trim().to_string();
        category.slug = name_slug(&category.name)?;

        let item = to_item(&category)
            .map_err(|e| RepoError::storage("create_category", &category.slug, e))?;
        let ops = vec![
            WriteOp::put(item, Condition::NotExists),
            Claim::CategorySlug(&category.slug).acquire(None),
        ];

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "create_category", &category.slug, |_| {
                Some(RepoError::Conflict(format!(
                    "category '{}' already exists",
                    category.slug
                )))
            })
        })?;

        tracing::info!(slug = %category.slug, "category created");
        Ok(category)
    }

    pub async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category> {
        self.load(&category_key(slug), "get_category_by_slug", slug)
            .await?
            .ok_or_else(|| RepoError::not_found("category", slug))
    }

    /// All categories, ordered by slug.
    pub async fn get_all_categories(&self) -> RepoResult<Vec<Category>> {
        self.list(
            Index::ByType,
            CATEGORY_TYPE.to_string(),
            false,
            "get_all_categories",
        )
        .await
    }

    /// Updates name and description. A name with a different slug renames the
    /// category: the old record and claim are retired, the new ones written,
    /// and every post in the category re-pointed, all in one transaction.
    pub async fn update_category(
        &self,
        old_slug: &str,
        mut category: Category,
    ) -> RepoResult<Category> {
        let existing = self.get_category_by_slug(old_slug).await?;
        category.name = category.name.trim().to_string();
        let new_slug = name_slug(&category.name)?;

        category.slug = new_slug;
        category.created_at = existing.created_at;
        category.updated_at = Utc::now();
        let item = to_item(&category)
            .map_err(|e| RepoError::storage("update_category", old_slug, e))?;

        if category.slug == old_slug {
            self.table
                .put(item, Condition::Exists)
                .await
                .map_err(|e| {
                    map_write_error(e, "update_category", old_slug, |_| {
                        Some(RepoError::not_found("category", old_slug))
                    })
                })?;
            tracing::info!(slug = old_slug, "category updated");
            return Ok(category);
        }

        if existing.is_protected() {
            return Err(protected(old_slug));
        }

        let posts = self.get_posts_by_category(old_slug).await?;
        let mut ops = vec![
            Claim::CategorySlug(old_slug).release(),
            WriteOp::delete(category_key(old_slug), Condition::Exists),
            Claim::CategorySlug(&category.slug).acquire(None),
            WriteOp::put(item, Condition::NotExists),
        ];
        for mut post in posts {
            post.category = category.slug.clone();
            let item = to_item(&post)
                .map_err(|e| RepoError::storage("update_category", &post.slug, e))?;
            ops.push(WriteOp::put(item, Condition::Exists));
        }

        let limit = self.table.max_transaction_items();
        if ops.len() > limit {
            return Err(RepoError::Conflict(format!(
                "category '{old_slug}' has too many posts to rename in one transaction ({} writes, limit {limit})",
                ops.len()
            )));
        }

        let moved = ops.len() - 4;
        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "update_category", old_slug, |index| match index {
                0 | 1 => Some(RepoError::not_found("category", old_slug)),
                2 | 3 => Some(RepoError::Conflict(format!(
                    "category '{}' already exists",
                    category.slug
                ))),
                _ => Some(RepoError::Conflict(format!(
                    "posts in category '{old_slug}' changed during rename"
                ))),
            })
        })?;

        tracing::info!(old_slug, new_slug = %category.slug, posts = moved, "category renamed");
        Ok(category)
    }

    /// Checks that `slug` exists, is not protected, and has no posts.
    async fn ensure_category_deletable(&self, slug: &str) -> RepoResult<()> {
        if slug == UNCATEGORIZED_SLUG {
            return Err(protected(slug));
        }
        self.get_category_by_slug(slug).await?;
        let posts = self.get_posts_by_category(slug).await?;
        if !posts.is_empty() {
            return Err(RepoError::Conflict(format!(
                "category '{slug}' still has {} post(s)",
                posts.len()
            )));
        }
        Ok(())
    }

    // A post created between the guard and the delete keeps pointing at the
    // removed slug; the single-table model has no way to lock the partition.
    pub async fn delete_category(&self, slug: &str) -> RepoResult<()> {
        self.ensure_category_deletable(slug).await?;

        let ops = vec![
            WriteOp::delete(category_key(slug), Condition::Exists),
            Claim::CategorySlug(slug).release_if_present(),
        ];
        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "delete_category", slug, |index| {
                (index == 0).then(|| RepoError::not_found("category", slug))
            })
        })?;

        tracing::info!(slug, "category deleted");
        Ok(())
    }

    /// Deletes several categories after checking all of them.
    pub async fn delete_categories(&self, slugs: &[String]) -> RepoResult<BatchDeleteReport> {
        let mut unique: Vec<&str> = Vec::with_capacity(slugs.len());
        for slug in slugs {
            if !unique.contains(&slug.as_str()) {
                unique.push(slug);
            }
        }
        if unique.is_empty() {
            return Err(RepoError::Validation("no categories to delete".into()));
        }

        for slug in &unique {
            self.ensure_category_deletable(slug).await?;
        }

        let groups = unique
            .into_iter()
            .map(|slug| {
                DeleteGroup::new(
                    slug,
                    vec![
                        WriteOp::delete(category_key(slug), Condition::Exists),
                        Claim::CategorySlug(slug).release_if_present(),
                    ],
                )
            })
            .collect();

        delete_in_batches(self.table.as_ref(), "delete_categories", groups).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Table;
    use crate::repository::fixtures;
    use crate::repository::testing::FailingTable;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let (_, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Rust Lang", "")).await.unwrap();
        let err = repo
            .create_category(Category::new("rust-lang!", ""))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_symbol_only_name_is_rejected() {
        let (_, repo) = fixtures::seeded().await;
        let err = repo.create_category(Category::new("???", "")).await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_categories() {
        let (_, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Zig", "")).await.unwrap();
        repo.create_category(Category::new("Ada", "")).await.unwrap();

        let slugs: Vec<_> = repo
            .get_all_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.slug)
            .collect();
        assert_eq!(slugs, vec!["ada", "uncategorized", "zig"]);
    }

    #[tokio::test]
    async fn test_delete_category_with_posts_is_conflict() {
        let (_, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Rust", "")).await.unwrap();
        fixtures::post(&repo, "Ownership", "rust").await;

        assert!(repo.delete_category("rust").await.unwrap_err().is_conflict());
        assert_eq!(repo.get_category_by_slug("rust").await.unwrap().name, "Rust");
    }

    #[tokio::test]
    async fn test_protected_category_cannot_be_deleted() {
        let (_, repo) = fixtures::seeded().await;
        for _ in 0..2 {
            assert!(repo
                .delete_category(UNCATEGORIZED_SLUG)
                .await
                .unwrap_err()
                .is_conflict());
        }
        let err = repo
            .delete_categories(&[UNCATEGORIZED_SLUG.to_string()])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(repo.get_category_by_slug(UNCATEGORIZED_SLUG).await.is_ok());
    }

    #[tokio::test]
    async fn test_protected_category_cannot_be_renamed() {
        let (_, repo) = fixtures::seeded().await;
        let err = repo
            .update_category(UNCATEGORIZED_SLUG, Category::new("Misc", ""))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let described = repo
            .update_category(UNCATEGORIZED_SLUG, Category::new("Uncategorized", "Leftovers"))
            .await
            .unwrap();
        assert_eq!(described.description, "Leftovers");
    }

    #[tokio::test]
    async fn test_rename_repoints_posts() {
        let (table, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Rust", "")).await.unwrap();
        fixtures::post(&repo, "One", "rust").await;
        fixtures::post(&repo, "Two", "rust").await;
        let before = table.len().await;

        let renamed = repo
            .update_category("rust", Category::new("Rust Lang", "systems"))
            .await
            .unwrap();

        assert_eq!(renamed.slug, "rust-lang");
        assert_eq!(table.len().await, before);
        assert!(repo.get_category_by_slug("rust").await.unwrap_err().is_not_found());
        assert!(repo.get_posts_by_category("rust").await.unwrap().is_empty());
        let moved = repo.get_posts_by_category("rust-lang").await.unwrap();
        assert_eq!(moved.len(), 2);
        assert_eq!(repo.get_post_by_slug("one").await.unwrap().category, "rust-lang");
    }

    #[tokio::test]
    async fn test_rename_onto_existing_is_conflict() {
        let (table, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Rust", "")).await.unwrap();
        repo.create_category(Category::new("Go", "")).await.unwrap();
        let before = table.keys().await;

        let err = repo
            .update_category("go", Category::new("Rust", ""))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(table.keys().await, before);
    }

    #[tokio::test]
    async fn test_rename_beyond_transaction_limit_is_conflict() {
        let (_, repo) = fixtures::seeded_with_limit(5).await;
        repo.create_category(Category::new("Rust", "")).await.unwrap();
        fixtures::post(&repo, "One", "rust").await;
        fixtures::post(&repo, "Two", "rust").await;

        let err = repo
            .update_category("rust", Category::new("Crab", ""))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.get_posts_by_category("rust").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rename_failure_leaves_old_state() {
        let (table, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Rust", "")).await.unwrap();
        fixtures::post(&repo, "One", "rust").await;
        let before = table.keys().await;

        let failing = Repository::new(Arc::new(
            FailingTable::new(table.clone()).fail_transaction(1),
        ));
        let err = failing
            .update_category("rust", Category::new("Crab", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::Storage { .. }));
        assert_eq!(table.keys().await, before);
        assert_eq!(repo.get_post_by_slug("one").await.unwrap().category, "rust");
        assert!(table.get(&Claim::CategorySlug("crab").key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_categories_prevalidates_all() {
        let (table, repo) = fixtures::seeded().await;
        for name in ["A", "B", "C"] {
            repo.create_category(Category::new(name, "")).await.unwrap();
        }
        fixtures::post(&repo, "In C", "c").await;
        let before = table.len().await;

        let err = repo
            .delete_categories(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(table.len().await, before);

        let err = repo
            .delete_categories(&["a".into(), "nope".into()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let report = repo
            .delete_categories(&["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(report.deleted, vec!["a", "b"]);
        assert_eq!(table.len().await, before - 4);
    }

    #[tokio::test]
    async fn test_deleted_category_slug_is_reusable() {
        let (_, repo) = fixtures::seeded().await;
        repo.create_category(Category::new("Temp", "")).await.unwrap();
        repo.delete_category("temp").await.unwrap();
        assert!(repo.delete_category("temp").await.unwrap_err().is_not_found());
        repo.create_category(Category::new("Temp", "")).await.unwrap();
    }
}
