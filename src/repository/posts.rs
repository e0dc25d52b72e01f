use chrono::Utc;

use super::batch::{delete_in_batches, DeleteGroup};
use super::index::{
    category_key, post_key, posts_by_author_partition, posts_by_category_partition, to_item,
    user_key, POST_TYPE,
};
use super::uniqueness::Claim;
use super::{map_write_error, Repository};
use crate::db::{Condition, Index, WriteOp};
use crate::domain::{Post, UNCATEGORIZED_SLUG};
use crate::error::{BatchDeleteReport, RepoError, RepoResult};
use crate::slug::{slugify, unique_slug};

/// Times a create re-probes for a free slug after losing a race.
const SLUG_CLAIM_ATTEMPTS: usize = 3;

/// One page of posts, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PostPage {
    pub posts: Vec<Post>,
    /// Posts matching the filter across all pages.
    pub total: usize,
    pub page_index: usize,
    pub page_size: usize,
    pub has_next_page: bool,
}

fn title_slug(title: &str) -> RepoResult<String> {
    if title.trim().is_empty() {
        return Err(RepoError::Validation("title must not be empty".into()));
    }
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(RepoError::Validation(format!(
            "title '{title}' must contain at least one letter or digit"
        )));
    }
    Ok(slug)
}

fn matches_title(post: &Post, filter: Option<&str>) -> bool {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(needle) => post.title.to_lowercase().contains(&needle.to_lowercase()),
        None => true,
    }
}

impl Repository {
    async fn post_slug_taken(&self, candidate: String) -> RepoResult<bool> {
        self.exists(&Claim::PostSlug(&candidate).key(), "post_slug_probe", &candidate)
            .await
    }

    async fn require_category(&self, slug: &str, operation: &'static str) -> RepoResult<()> {
        if self.exists(&category_key(slug), operation, slug).await? {
            Ok(())
        } else {
            Err(RepoError::Validation(format!("category '{slug}' does not exist")))
        }
    }

    /// Assigns a slug from the title and claims it together with the post.
    ///
    /// The author and the category must exist; both are re-checked inside the
    /// transaction.
    pub async fn create_post(&self, mut post: Post) -> RepoResult<Post> {
        let base = title_slug(&post.title)?;
        if post.category.is_empty() {
            post.category = UNCATEGORIZED_SLUG.to_string();
        }

        if !self
            .exists(&user_key(&post.author_id), "create_post", &post.author_id)
            .await?
        {
            return Err(RepoError::Validation(format!(
                "author '{}' does not exist",
                post.author_id
            )));
        }
        self.require_category(&post.category, "create_post").await?;

        let mut attempt = 1;
        loop {
            post.slug = unique_slug(&base, |candidate| self.post_slug_taken(candidate)).await?;
            let item = to_item(&post).map_err(|e| RepoError::storage("create_post", &post.slug, e))?;
            let ops = vec![
                WriteOp::put(item, Condition::NotExists),
                Claim::PostSlug(&post.slug).acquire(Some(&post.author_id)),
                WriteOp::check(user_key(&post.author_id), Condition::Exists),
                WriteOp::check(category_key(&post.category), Condition::Exists),
            ];

            let result = self.table.transact_write(ops).await.map_err(|e| {
                map_write_error(e, "create_post", &post.slug, |index| match index {
                    0 | 1 => Some(RepoError::Conflict(format!(
                        "slug '{}' is already taken",
                        post.slug
                    ))),
                    2 => Some(RepoError::Validation(format!(
                        "author '{}' does not exist",
                        post.author_id
                    ))),
                    _ => Some(RepoError::Validation(format!(
                        "category '{}' does not exist",
                        post.category
                    ))),
                })
            });

            match result {
                Ok(()) => break,
                Err(RepoError::Conflict(_)) if attempt < SLUG_CLAIM_ATTEMPTS => {
                    tracing::debug!(slug = %post.slug, attempt, "slug claimed concurrently, re-probing");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(slug = %post.slug, author = %post.author_id, "post created");
        Ok(post)
    }

    pub async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
        self.load(&post_key(slug), "get_post_by_slug", slug)
            .await?
            .ok_or_else(|| RepoError::not_found("post", slug))
    }

    /// Offset pagination over all posts, newest first, optionally filtered by
    /// a case-insensitive title substring.
    pub async fn get_all_posts(
        &self,
        title_filter: Option<&str>,
        page_size: usize,
        page_index: usize,
    ) -> RepoResult<PostPage> {
        if page_size == 0 {
            return Err(RepoError::Validation("page size must be positive".into()));
        }

        let matching: Vec<Post> = self
            .list::<Post>(Index::ByType, POST_TYPE.to_string(), true, "get_all_posts")
            .await?
            .into_iter()
            .filter(|post| matches_title(post, title_filter))
            .collect();

        let total = matching.len();
        let posts = matching
            .into_iter()
            .skip(page_index.saturating_mul(page_size))
            .take(page_size)
            .collect();
        let has_next_page = page_index
            .saturating_add(1)
            .saturating_mul(page_size)
            < total;

        Ok(PostPage {
            posts,
            total,
            page_index,
            page_size,
            has_next_page,
        })
    }

    /// Posts by one author, newest first.
    pub async fn get_posts_by_user(
        &self,
        username: &str,
        title_filter: Option<&str>,
    ) -> RepoResult<Vec<Post>> {
        let posts: Vec<Post> = self
            .list(
                Index::ByAuthor,
                posts_by_author_partition(username),
                true,
                "get_posts_by_user",
            )
            .await?;
        Ok(posts
            .into_iter()
            .filter(|post| matches_title(post, title_filter))
            .collect())
    }

    /// Posts in one category, newest first.
    pub async fn get_posts_by_category(&self, category_slug: &str) -> RepoResult<Vec<Post>> {
        self.list(
            Index::ByCategory,
            posts_by_category_partition(category_slug),
            true,
            "get_posts_by_category",
        )
        .await
    }

    /// Replaces the post stored under `old_slug`.
    ///
    /// The author and creation time are kept. The slug stays when the new
    /// title slugifies to the old title's base or to the current slug itself.
    /// Otherwise the old post and claim are retired and the new ones written
    /// in one transaction; the post is then under exactly one slug.
    pub async fn update_post(&self, old_slug: &str, mut post: Post) -> RepoResult<Post> {
        let existing = self.get_post_by_slug(old_slug).await?;
        let new_base = title_slug(&post.title)?;
        if post.category.is_empty() {
            post.category = existing.category.clone();
        }
        if post.category != existing.category {
            self.require_category(&post.category, "update_post").await?;
        }

        post.author_id = existing.author_id.clone();
        post.created_at = existing.created_at;
        post.updated_at = Utc::now();

        post.slug = if new_base == slugify(&existing.title) || new_base == existing.slug {
            existing.slug.clone()
        } else {
            // The post's own claim does not count as taken.
            unique_slug(&new_base, move |candidate| async move {
                if candidate == old_slug {
                    Ok(false)
                } else {
                    self.post_slug_taken(candidate).await
                }
            })
            .await?
        };

        if post.slug == existing.slug {
            let item = to_item(&post).map_err(|e| RepoError::storage("update_post", old_slug, e))?;
            let ops = vec![
                WriteOp::put(item, Condition::Exists),
                WriteOp::check(category_key(&post.category), Condition::Exists),
            ];
            self.table.transact_write(ops).await.map_err(|e| {
                map_write_error(e, "update_post", old_slug, |index| match index {
                    0 => Some(RepoError::not_found("post", old_slug)),
                    _ => Some(RepoError::Validation(format!(
                        "category '{}' does not exist",
                        post.category
                    ))),
                })
            })?;
            tracing::info!(slug = %post.slug, "post updated");
            return Ok(post);
        }

        let item = to_item(&post).map_err(|e| RepoError::storage("update_post", old_slug, e))?;
        let ops = vec![
            Claim::PostSlug(old_slug).release(),
            WriteOp::delete(post_key(old_slug), Condition::Exists),
            Claim::PostSlug(&post.slug).acquire(Some(&post.author_id)),
            WriteOp::put(item, Condition::NotExists),
            WriteOp::check(category_key(&post.category), Condition::Exists),
        ];

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "update_post", old_slug, |index| match index {
                0 | 1 => Some(RepoError::not_found("post", old_slug)),
                2 | 3 => Some(RepoError::Conflict(format!(
                    "slug '{}' is already taken",
                    post.slug
                ))),
                _ => Some(RepoError::Validation(format!(
                    "category '{}' does not exist",
                    post.category
                ))),
            })
        })?;

        tracing::info!(old_slug, new_slug = %post.slug, "post renamed");
        Ok(post)
    }

    /// Removes the post and releases its slug.
    pub async fn delete_post(&self, slug: &str) -> RepoResult<()> {
        let ops = vec![
            WriteOp::delete(post_key(slug), Condition::Exists),
            Claim::PostSlug(slug).release_if_present(),
        ];
        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "delete_post", slug, |index| {
                (index == 0).then(|| RepoError::not_found("post", slug))
            })
        })?;

        tracing::info!(slug, "post deleted");
        Ok(())
    }

    /// Deletes several posts. Every slug must exist before anything is
    /// deleted; the deletes then run in capped batches that commit
    /// independently.
    pub async fn delete_posts(&self, slugs: &[String]) -> RepoResult<BatchDeleteReport> {
        let mut unique: Vec<&str> = Vec::with_capacity(slugs.len());
        for slug in slugs {
            if !unique.contains(&slug.as_str()) {
                unique.push(slug);
            }
        }
        if unique.is_empty() {
            return Err(RepoError::Validation("no posts to delete".into()));
        }

        for slug in &unique {
            self.get_post_by_slug(slug).await?;
        }

        let groups = unique
            .into_iter()
            .map(|slug| {
                DeleteGroup::new(
                    slug,
                    vec![
                        WriteOp::delete(post_key(slug), Condition::Exists),
                        Claim::PostSlug(slug).release_if_present(),
                    ],
                )
            })
            .collect();

        delete_in_batches(self.table.as_ref(), "delete_posts", groups).await
    }
}
