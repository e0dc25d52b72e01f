/**
 * User Routes
 * Account listing, profile updates and deletion
 */
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use super::auth::{hash_password, validate_password, AuthUser};
use super::{ApiResult, AppState};
use crate::dto::{ListDto, PostDto, UpdateUserRequest, UserDto};

#[derive(Debug, Deserialize)]
pub struct PostFilterQuery {
    pub filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteUserQuery {
    /// Also delete every post the user owns.
    #[serde(default)]
    pub purge: bool,
}

/// GET /api/users - administrators only
pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<Json<ListDto<UserDto>>> {
    caller.require_admin()?;
    let users = state.repo.get_all_users().await?;
    Ok(Json(ListDto::new(users.iter().map(UserDto::from).collect())))
}

/// GET /api/users/{username} - the user themselves or an administrator
pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(username): Path<String>,
) -> ApiResult<Json<UserDto>> {
    caller.require_owner_or_admin(&username)?;
    let user = state.repo.get_user_by_username(&username).await?;
    Ok(Json(UserDto::from(&user)))
}

/// PATCH /api/users/{username}
///
/// Users may change their own email and password; only administrators may
/// change roles.
pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(username): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserDto>> {
    caller.require_owner_or_admin(&username)?;
    let mut user = state.repo.get_user_by_username(&username).await?;

    if let Some(role) = payload.role {
        if role != user.role {
            caller.require_admin()?;
            user.role = role;
        }
    }
    if let Some(email) = payload.email {
        user.email = email;
    }
    if let Some(password) = payload.password {
        validate_password(&password)?;
        user.password_hash = hash_password(password).await?;
    }

    let user = state.repo.update_user(user).await?;
    Ok(Json(UserDto::from(&user)))
}

/// DELETE /api/users/{username}[?purge=true] - administrators only
///
/// Without `purge` the user must own no posts. With it, their posts are
/// deleted first in batches and the per-item report is returned.
pub async fn delete_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(username): Path<String>,
    Query(query): Query<DeleteUserQuery>,
) -> ApiResult<Response> {
    caller.require_admin()?;
    if query.purge {
        let report = state.repo.purge_user(&username, caller.username()).await?;
        return Ok(Json(report).into_response());
    }
    state.repo.delete_user(&username, caller.username()).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /api/users/{username}/posts[?filter=] - newest first
pub async fn list_user_posts(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PostFilterQuery>,
) -> ApiResult<Json<ListDto<PostDto>>> {
    let posts = state
        .repo
        .get_posts_by_user(&username, query.filter.as_deref())
        .await?;
    Ok(Json(ListDto::new(posts.iter().map(PostDto::from).collect())))
}
