/**
 * Image Routes
 * Authenticated uploads, per-owner listing and signed downloads
 */
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::auth::AuthUser;
use super::{ApiError, ApiResult, AppState, MAX_PAGE_SIZE};
use crate::storage::{validate_path, PaginatedImages};

const DEFAULT_IMAGE_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListQuery {
    #[serde(default)]
    pub page_index: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Administrators may list every owner's images.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImagePathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
}

fn page_size(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_IMAGE_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Owner segment of an `{owner}/{name}` path.
fn path_owner(path: &str) -> ApiResult<&str> {
    validate_path(path)?;
    path.split_once('/')
        .map(|(owner, _)| owner)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid image path '{path}'")))
}

/// POST /api/images (multipart, field `file`)
pub async fn upload_image(
    State(state): State<AppState>,
    caller: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "multipart error");
        ApiError::BadRequest("invalid multipart data".into())
    })? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().unwrap_or("").to_string();
        let bytes = field.bytes().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to read upload bytes");
            ApiError::BadRequest("failed to read file data".into())
        })?;

        let metadata = state
            .images
            .upload(caller.username(), &filename, bytes.to_vec(), &content_type)
            .await?;
        tracing::info!(path = %metadata.path, size = metadata.size, "image uploaded");
        return Ok((StatusCode::CREATED, Json(metadata)));
    }
    Err(ApiError::BadRequest("no file provided".into()))
}

/// GET /api/images?pageIndex=&pageSize=&all=
pub async fn list_images(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ImageListQuery>,
) -> ApiResult<Json<PaginatedImages>> {
    let owner = if query.all {
        caller.require_admin()?;
        None
    } else {
        Some(caller.username())
    };
    let page = state
        .images
        .list(owner, query.page_index, page_size(query.page_size))
        .await?;
    Ok(Json(page))
}

/// DELETE /api/images?path=
pub async fn delete_image(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ImagePathQuery>,
) -> ApiResult<StatusCode> {
    if caller.is_admin() {
        state.images.delete_as_admin(&query.path).await?;
    } else {
        state.images.delete(caller.username(), &query.path).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/images/url?path= - a time-limited download link
pub async fn image_url(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ImagePathQuery>,
) -> ApiResult<Json<UrlResponse>> {
    let owner = if caller.is_admin() {
        path_owner(&query.path)?
    } else {
        caller.username()
    };
    let url = state.images.presigned_url(owner, &query.path).await?;
    Ok(Json(UrlResponse { url }))
}

/// GET /uploads/{*path}?expires=&signature=
pub async fn serve_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<impl IntoResponse> {
    validate_path(&path)?;
    state.signer.verify(&path, query.expires, &query.signature)?;
    let (bytes, content_type) = state.images.read(&path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=300".to_string()),
        ],
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::routes::test_support::{send, state, user_token};
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    const BOUNDARY: &str = "XBOUNDARYX";

    fn images_router(state: AppState) -> Router {
        Router::new()
            .route(
                "/api/images",
                get(list_images).post(upload_image).delete(delete_image),
            )
            .route("/api/images/url", get(image_url))
            .route("/uploads/{*path}", get(serve_image))
            .with_state(state)
    }

    async fn upload(app: Router, token: &str, filename: &str, data: &[u8]) -> (StatusCode, serde_json::Value) {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri("/api/images")
            .header("authorization", format!("Bearer {token}"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or_default())
    }

    #[tokio::test]
    async fn test_upload_list_and_signed_download() {
        let state = state().await;
        let token = user_token(&state, "ann", Role::Author).await;
        let app = images_router(state);

        let (status, meta) = upload(app.clone(), &token, "cat.png", PNG).await;
        assert_eq!(status, StatusCode::CREATED);
        let path = meta["path"].as_str().unwrap().to_string();
        assert!(path.starts_with("ann/"));

        let (status, page) = send(app.clone(), "GET", "/api/images", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);

        let (status, body) = send(
            app.clone(),
            "GET",
            &format!("/api/images/url?path={path}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let url = body["url"].as_str().unwrap();
        let local = &url[url.find("/uploads/").unwrap()..];

        let res = app
            .clone()
            .oneshot(Request::get(local).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "image/png");

        let tampered = local.replace("signature=", "signature=0");
        let (status, _) = send(app, "GET", &tampered, None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_upload_rejects_non_images() {
        let state = state().await;
        let token = user_token(&state, "ann", Role::Author).await;
        let app = images_router(state);

        let (status, _) = upload(app, &token, "notes.png", b"plain text").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_users_cannot_delete() {
        let state = state().await;
        let ann = user_token(&state, "ann", Role::Author).await;
        let bob = user_token(&state, "bob", Role::Author).await;
        let admin = user_token(&state, "root", Role::Admin).await;
        let app = images_router(state);

        let (_, meta) = upload(app.clone(), &ann, "cat.png", PNG).await;
        let uri = format!("/api/images?path={}", meta["path"].as_str().unwrap());

        let (status, _) = send(app.clone(), "DELETE", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(app.clone(), "GET", "/api/images?all=true", Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(app.clone(), "DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(app, "DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
