/**
 * Health Routes
 * Liveness and readiness, backed by the table's own health check
 */
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::AppState;

lazy_static::lazy_static! {
    static ref SERVER_START: Instant = Instant::now();
}

/// Starts the uptime clock.
pub fn init_start_time() {
    lazy_static::initialize(&SERVER_START);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: String,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub environment: String,
    pub table: ServiceCheck,
}

async fn check_table(state: &AppState) -> ServiceCheck {
    match state.repo.table().health_check().await {
        Ok(elapsed) => ServiceCheck {
            status: "healthy".to_string(),
            response_time: Some(elapsed.as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "table health check failed");
            ServiceCheck {
                status: "unhealthy".to_string(),
                response_time: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// GET /health
pub async fn health_ping() -> impl IntoResponse {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/ready - 503 while the table is unreachable
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let table = check_table(&state).await;
    let ready = table.status == "healthy";
    let response = ReadyResponse {
        status: if ready { "ready" } else { "not ready" }.to_string(),
        timestamp: Utc::now(),
        uptime: SERVER_START.elapsed().as_secs(),
        environment: state.config.environment.as_str().to_string(),
        table,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::FailingTable;
    use crate::repository::Repository;
    use crate::routes::test_support::{send, state};
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;

    fn health_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_ping))
            .route("/health/ready", get(health_ready))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_health_ping_returns_ok() {
        init_start_time();
        let (status, body) = send(health_router(state().await), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_reports_table_latency() {
        let (status, body) =
            send(health_router(state().await), "GET", "/health/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
        assert_eq!(body["table"]["status"], "healthy");
        assert_eq!(body["environment"], "development");
    }

    #[tokio::test]
    async fn test_ready_is_unavailable_when_table_is_down() {
        let mut state = state().await;
        let failing = FailingTable::new(state.repo.table().clone()).fail_health_check();
        state.repo = Repository::new(Arc::new(failing));

        let (status, body) = send(health_router(state), "GET", "/health/ready", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["table"]["status"], "unhealthy");
    }
}
