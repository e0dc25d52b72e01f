/**
 * Routes Module
 * HTTP handlers, shared state and error mapping
 */
pub mod auth;
pub mod categories;
pub mod health;
pub mod images;
pub mod posts;
pub mod users;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::error::{BatchDeleteReport, RepoError};
use crate::repository::Repository;
use crate::storage::{ImageError, ImageStore, UrlSigner};

/// Everything a handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub repo: Repository,
    pub images: Arc<dyn ImageStore>,
    pub signer: UrlSigner,
    pub config: Arc<Config>,
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Per-item outcome of an interrupted bulk delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchDeleteReport>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn body(status: StatusCode, error: &str, message: Option<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
            report: None,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Repo(RepoError::Conflict(msg)) => {
                body(StatusCode::CONFLICT, "Conflict", Some(msg))
            }
            ApiError::Repo(err @ RepoError::NotFound { .. }) => {
                body(StatusCode::NOT_FOUND, "Not found", Some(err.to_string()))
            }
            ApiError::Repo(RepoError::Validation(msg)) => {
                body(StatusCode::BAD_REQUEST, "Validation failed", Some(msg))
            }
            // Already logged with context where the error was raised.
            ApiError::Repo(RepoError::Storage { .. }) => body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage failure",
                None,
            ),
            ApiError::Repo(RepoError::PartialFailure(report)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Partial failure".to_string(),
                    message: Some(format!(
                        "{} deleted, {} not deleted",
                        report.deleted.len(),
                        report.failed.len()
                    )),
                    report: Some(report),
                }),
            )
                .into_response(),
            ApiError::Image(err) => match err {
                ImageError::Invalid(msg) => body(StatusCode::BAD_REQUEST, "Invalid image", Some(msg)),
                ImageError::NotFound(path) => {
                    body(StatusCode::NOT_FOUND, "Not found", Some(format!("image not found: {path}")))
                }
                ImageError::NotOwner { .. } | ImageError::BadSignature => {
                    body(StatusCode::FORBIDDEN, "Forbidden", Some(err.to_string()))
                }
                ImageError::Io(_) | ImageError::Metadata(_) => {
                    tracing::error!(error = %err, "image storage failure");
                    body(StatusCode::INTERNAL_SERVER_ERROR, "Storage failure", None)
                }
            },
            ApiError::BadRequest(msg) => body(StatusCode::BAD_REQUEST, "Bad request", Some(msg)),
            ApiError::Unauthorized(msg) => {
                body(StatusCode::UNAUTHORIZED, "Unauthorized", Some(msg))
            }
            ApiError::Forbidden(msg) => body(StatusCode::FORBIDDEN, "Forbidden", Some(msg)),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                body(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", None)
            }
        }
    }
}

/// Upper bound on any client-requested page size.
pub const MAX_PAGE_SIZE: usize = 100;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::InMemoryTable;
    use crate::domain::{Role, User};
    use crate::storage::InMemoryImageStore;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use tower::ServiceExt;

    pub async fn state() -> AppState {
        let config = Config::for_tests();
        let repo = Repository::new(Arc::new(InMemoryTable::new()));
        repo.seed(None).await.unwrap();
        let signer = UrlSigner::new(
            config.jwt_secret.clone(),
            config.public_base_url.clone(),
            config.presigned_url_ttl,
        ).unwrap();
        AppState {
            repo,
            images: Arc::new(InMemoryImageStore::new(signer.clone())),
            signer,
            config: Arc::new(config),
        }
    }

    /// Creates a user directly and returns a valid access token for them.
    pub async fn user_token(state: &AppState, username: &str, role: Role) -> String {
        let mut user = User::new(username, format!("{username}@example.com"), "unused-hash");
        user.role = role;
        let user = state.repo.create_user(user).await.unwrap();
        super::auth::create_access_token(&state.config, &user).unwrap()
    }

    pub async fn send(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        json: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match json {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let res = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }
}
