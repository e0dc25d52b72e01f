/**
 * Post Routes
 * Public listing and reading, authenticated writes
 */
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::auth::AuthUser;
use super::{ApiError, ApiResult, AppState, MAX_PAGE_SIZE};
use crate::domain::{Post, PostStatus};
use crate::dto::{
    CreatePostRequest, DeleteManyRequest, ListDto, PostDto, PostListDto, UpdatePostRequest,
};
use crate::error::BatchDeleteReport;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListQuery {
    pub filter: Option<String>,
    #[serde(default)]
    pub page_index: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    10
}

/// Sanitize HTML content using ammonia
fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

fn parse_status(raw: &str) -> ApiResult<PostStatus> {
    PostStatus::parse(raw.trim())
        .ok_or_else(|| ApiError::BadRequest(format!("unknown post status '{raw}'")))
}

/// GET /api/posts?filter=&pageIndex=&pageSize=
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> ApiResult<Json<PostListDto>> {
    let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
    let page = state
        .repo
        .get_all_posts(query.filter.as_deref(), page_size, query.page_index)
        .await?;
    Ok(Json(PostListDto::from(&page)))
}

/// GET /api/posts/{slug}
pub async fn get_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<PostDto>> {
    let post = state.repo.get_post_by_slug(&slug).await?;
    Ok(Json(PostDto::from(&post)))
}

/// POST /api/posts - the caller becomes the author
pub async fn create_post(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut post = Post::new(
        payload.title,
        sanitize_html(&payload.content),
        caller.username(),
        payload.category.unwrap_or_default(),
    );
    post.thumbnail_url = payload.thumbnail_url.unwrap_or_default();
    if let Some(status) = payload.status.as_deref() {
        post.status = parse_status(status)?;
    }

    let post = state.repo.create_post(post).await?;
    Ok((StatusCode::CREATED, Json(PostDto::from(&post))))
}

/// PATCH /api/posts/{slug} - author or administrator
///
/// A changed title moves the post to a new slug; the response carries it.
pub async fn update_post(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<UpdatePostRequest>,
) -> ApiResult<Json<PostDto>> {
    let mut post = state.repo.get_post_by_slug(&slug).await?;
    caller.require_owner_or_admin(&post.author_id)?;

    if let Some(title) = payload.title {
        post.title = title;
    }
    if let Some(content) = payload.content {
        post.content = sanitize_html(&content);
    }
    if let Some(category) = payload.category {
        post.category = category;
    }
    if let Some(thumbnail_url) = payload.thumbnail_url {
        post.thumbnail_url = thumbnail_url;
    }
    if let Some(status) = payload.status.as_deref() {
        post.status = parse_status(status)?;
    }

    let post = state.repo.update_post(&slug, post).await?;
    Ok(Json(PostDto::from(&post)))
}

/// DELETE /api/posts/{slug} - author or administrator
pub async fn delete_post(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    let post = state.repo.get_post_by_slug(&slug).await?;
    caller.require_owner_or_admin(&post.author_id)?;
    state.repo.delete_post(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/posts/delete
///
/// Non-administrators may only bulk-delete their own posts. Slugs that do not
/// exist are left for the repository to reject.
pub async fn delete_posts(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(payload): Json<DeleteManyRequest>,
) -> ApiResult<Json<BatchDeleteReport>> {
    if !caller.is_admin() {
        for slug in &payload.slugs {
            match state.repo.get_post_by_slug(slug).await {
                Ok(post) => caller.require_owner_or_admin(&post.author_id)?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    let report = state.repo.delete_posts(&payload.slugs).await?;
    Ok(Json(report))
}

/// GET /api/categories/{slug}/posts - newest first
pub async fn list_category_posts(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<ListDto<PostDto>>> {
    state.repo.get_category_by_slug(&slug).await?;
    let posts = state.repo.get_posts_by_category(&slug).await?;
    Ok(Json(ListDto::new(posts.iter().map(PostDto::from).collect())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::routes::test_support::{send, state, user_token};
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    fn posts_router(state: AppState) -> Router {
        Router::new()
            .route("/api/posts", get(list_posts).post(create_post))
            .route("/api/posts/delete", post(delete_posts))
            .route(
                "/api/posts/{slug}",
                get(get_post).patch(update_post).delete(delete_post),
            )
            .route("/api/categories/{slug}/posts", get(list_category_posts))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_create_requires_token() {
        let state = state().await;
        let app = posts_router(state);
        let (status, _) = send(
            app,
            "POST",
            "/api/posts",
            None,
            Some(json!({"title": "Hello", "content": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_sanitizes_and_dedupes_slug() {
        let state = state().await;
        let token = user_token(&state, "ann", Role::Author).await;
        let app = posts_router(state);

        let payload = json!({
            "title": "Test Post",
            "content": "<p>ok</p><script>alert(1)</script>",
            "status": "published"
        });
        let (status, first) = send(app.clone(), "POST", "/api/posts", Some(&token), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["slug"], "test-post");
        assert_eq!(first["author"], "ann");
        assert_eq!(first["category"], "uncategorized");
        assert_eq!(first["status"], "published");
        assert!(!first["content"].as_str().unwrap().contains("script"));

        let (status, second) = send(app, "POST", "/api/posts", Some(&token), Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["slug"], "test-post-1");
    }

    #[tokio::test]
    async fn test_bad_status_and_missing_category() {
        let state = state().await;
        let token = user_token(&state, "ann", Role::Author).await;
        let app = posts_router(state);

        let (status, _) = send(
            app.clone(),
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({"title": "A", "content": "x", "status": "archived"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            app,
            "POST",
            "/api/posts",
            Some(&token),
            Some(json!({"title": "A", "content": "x", "category": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_only_author_or_admin_may_edit() {
        let state = state().await;
        let ann = user_token(&state, "ann", Role::Author).await;
        let bob = user_token(&state, "bob", Role::Author).await;
        let admin = user_token(&state, "root", Role::Admin).await;
        let app = posts_router(state);

        send(
            app.clone(),
            "POST",
            "/api/posts",
            Some(&ann),
            Some(json!({"title": "Draft Idea", "content": "x"})),
        )
        .await;

        let (status, _) = send(
            app.clone(),
            "PATCH",
            "/api/posts/draft-idea",
            Some(&bob),
            Some(json!({"content": "hijacked"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            app.clone(),
            "PATCH",
            "/api/posts/draft-idea",
            Some(&admin),
            Some(json!({"title": "Final Idea"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["slug"], "final-idea");
        assert_eq!(body["author"], "ann");

        let (status, _) = send(app.clone(), "GET", "/api/posts/draft-idea", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app.clone(), "DELETE", "/api/posts/final-idea", Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(app, "DELETE", "/api/posts/final-idea", Some(&ann), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let state = state().await;
        let token = user_token(&state, "ann", Role::Author).await;
        let app = posts_router(state);
        for title in ["One", "Two", "Three"] {
            send(
                app.clone(),
                "POST",
                "/api/posts",
                Some(&token),
                Some(json!({"title": title, "content": "x"})),
            )
            .await;
        }

        let (status, body) = send(app.clone(), "GET", "/api/posts?pageSize=2", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["hasNextPage"], true);
        assert_eq!(body["items"][0]["slug"], "three");

        let (_, body) = send(app.clone(), "GET", "/api/posts?pageSize=2&pageIndex=1", None, None).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["hasNextPage"], false);

        let (status, body) = send(app, "GET", "/api/categories/uncategorized/posts", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_bulk_delete_checks_ownership() {
        let state = state().await;
        let ann = user_token(&state, "ann", Role::Author).await;
        let bob = user_token(&state, "bob", Role::Author).await;
        let app = posts_router(state);
        for (token, title) in [(&ann, "Mine"), (&bob, "Theirs")] {
            send(
                app.clone(),
                "POST",
                "/api/posts",
                Some(token),
                Some(json!({"title": title, "content": "x"})),
            )
            .await;
        }

        let (status, _) = send(
            app.clone(),
            "POST",
            "/api/posts/delete",
            Some(&ann),
            Some(json!({"slugs": ["mine", "theirs"]})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            app,
            "POST",
            "/api/posts/delete",
            Some(&ann),
            Some(json!({"slugs": ["mine"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], json!(["mine"]));
    }
}
