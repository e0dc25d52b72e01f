/**
 * Transfer Schema
 * Wire representation of every entity, version 1
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Category, Post, PostStatus, Role, User};
use crate::repository::PostPage;

/// Version of the JSON shapes below; bumped on any breaking change.
pub const SCHEMA_VERSION: u32 = 1;

// ============================================================================
// Responses
// ============================================================================

/// Public view of a user. Credentials never leave the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDto {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub thumbnail_url: String,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Post> for PostDto {
    fn from(post: &Post) -> Self {
        Self {
            slug: post.slug.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author: post.author_id.clone(),
            category: post.category.clone(),
            thumbnail_url: post.thumbnail_url.clone(),
            status: post.status,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDto {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Category> for CategoryDto {
    fn from(category: &Category) -> Self {
        Self {
            slug: category.slug.clone(),
            name: category.name.clone(),
            description: category.description.clone(),
            protected: category.is_protected(),
            created_at: category.created_at,
            updated_at: category.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListDto {
    pub version: u32,
    pub items: Vec<PostDto>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub has_next_page: bool,
}

impl From<&PostPage> for PostListDto {
    fn from(page: &PostPage) -> Self {
        Self {
            version: SCHEMA_VERSION,
            items: page.posts.iter().map(PostDto::from).collect(),
            page: page.page_index,
            page_size: page.page_size,
            total: page.total,
            has_next_page: page.has_next_page,
        }
    }
}

/// Envelope for unpaginated lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListDto<T> {
    pub version: u32,
    pub items: Vec<T>,
}

impl<T> ListDto<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            items,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `identifier` is either a username or an email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub user: UserDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    /// Only administrators may change roles.
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Body of the bulk delete endpoints.
#[derive(Debug, Deserialize)]
pub struct DeleteManyRequest {
    pub slugs: Vec<String>,
}
