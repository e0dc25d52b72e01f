use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

impl PostStatus {
    /// Parses a client-supplied status, `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "published" => Some(PostStatus::Published),
            _ => None,
        }
    }
}

/// A blog post, keyed by the slug derived from its title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Assigned by the repository on create and on title-changing updates.
    #[serde(default)]
    pub slug: String,
    pub title: String,
    pub content: String,
    /// Username of the author.
    pub author_id: String,
    /// Slug of the category.
    pub category: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        author_id: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            slug: String::new(),
            title: title.into(),
            content: content.into(),
            author_id: author_id.into(),
            category: category.into(),
            thumbnail_url: String::new(),
            status: PostStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}
