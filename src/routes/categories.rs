/**
 * Category Routes
 * Public reads; writes are restricted to administrators
 */
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::auth::AuthUser;
use super::{ApiResult, AppState};
use crate::domain::Category;
use crate::dto::{CategoryDto, CategoryRequest, DeleteManyRequest, ListDto};
use crate::error::BatchDeleteReport;

pub async fn list_categories(
    State(state): State<AppState>,
) -> ApiResult<Json<ListDto<CategoryDto>>> {
    let categories = state.repo.get_all_categories().await?;
    Ok(Json(ListDto::new(
        categories.iter().map(CategoryDto::from).collect(),
    )))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<CategoryDto>> {
    let category = state.repo.get_category_by_slug(&slug).await?;
    Ok(Json(CategoryDto::from(&category)))
}

pub async fn create_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(payload): Json<CategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    caller.require_admin()?;
    let category = state
        .repo
        .create_category(Category::new(payload.name, payload.description))
        .await?;
    Ok((StatusCode::CREATED, Json(CategoryDto::from(&category))))
}

/// PATCH /api/categories/{slug}
///
/// Renaming moves the category and its posts to the new slug.
pub async fn update_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<CategoryRequest>,
) -> ApiResult<Json<CategoryDto>> {
    caller.require_admin()?;
    let category = state
        .repo
        .update_category(&slug, Category::new(payload.name, payload.description))
        .await?;
    Ok(Json(CategoryDto::from(&category)))
}

pub async fn delete_category(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    caller.require_admin()?;
    state.repo.delete_category(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_categories(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(payload): Json<DeleteManyRequest>,
) -> ApiResult<Json<BatchDeleteReport>> {
    caller.require_admin()?;
    let report = state.repo.delete_categories(&payload.slugs).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Post, Role};
    use crate::routes::test_support::{send, state, user_token};
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    fn categories_router(state: AppState) -> Router {
        Router::new()
            .route("/api/categories", get(list_categories).post(create_category))
            .route("/api/categories/delete", post(delete_categories))
            .route(
                "/api/categories/{slug}",
                get(get_category)
                    .patch(update_category)
                    .delete(delete_category),
            )
            .with_state(state)
    }

    #[tokio::test]
    async fn test_seeded_category_is_listed_and_protected() {
        let state = state().await;
        let admin = user_token(&state, "root", Role::Admin).await;
        let app = categories_router(state);

        let (status, body) = send(app.clone(), "GET", "/api/categories", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"][0]["slug"], "uncategorized");
        assert_eq!(body["items"][0]["protected"], true);

        let (status, _) = send(
            app,
            "DELETE",
            "/api/categories/uncategorized",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_writes_require_admin() {
        let state = state().await;
        let author = user_token(&state, "ann", Role::Author).await;
        let admin = user_token(&state, "root", Role::Admin).await;
        let app = categories_router(state);

        let payload = json!({"name": "Rust Notes"});
        let (status, _) = send(app.clone(), "POST", "/api/categories", Some(&author), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(app.clone(), "POST", "/api/categories", Some(&admin), Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["slug"], "rust-notes");

        let (status, _) = send(app, "POST", "/api/categories", Some(&admin), Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_rename_moves_posts() {
        let state = state().await;
        let admin = user_token(&state, "root", Role::Admin).await;
        let app = categories_router(state.clone());
        send(
            app.clone(),
            "POST",
            "/api/categories",
            Some(&admin),
            Some(json!({"name": "Rust"})),
        )
        .await;
        state
            .repo
            .create_post(Post::new("Borrowing", "x", "root", "rust"))
            .await
            .unwrap();

        let (status, body) = send(
            app.clone(),
            "PATCH",
            "/api/categories/rust",
            Some(&admin),
            Some(json!({"name": "Rust Lang", "description": "systems"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["slug"], "rust-lang");

        let post = state.repo.get_post_by_slug("borrowing").await.unwrap();
        assert_eq!(post.category, "rust-lang");

        let (status, _) = send(app.clone(), "DELETE", "/api/categories/rust-lang", Some(&admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        state.repo.delete_post("borrowing").await.unwrap();
        let (status, body) = send(
            app,
            "POST",
            "/api/categories/delete",
            Some(&admin),
            Some(json!({"slugs": ["rust-lang"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], json!(["rust-lang"]));
    }
}
