//! Blog Backend - library for app logic and testing

pub mod config;
pub mod db;
pub mod domain;
pub mod dto;
pub mod error;
pub mod logging;
pub mod repository;
pub mod routes;
pub mod slug;
pub mod storage;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use config::{Config, ConfigError, StorageType, TableBackend};
use db::{InMemoryTable, PgTable, Table};
use error::RepoError;
use repository::Repository;
use routes::AppState;
use storage::{ImageError, ImageStore, InMemoryImageStore, LocalImageStore, UrlSigner};

/// Room for a 5 MB image plus multipart framing.
const BODY_LIMIT_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to seed initial records: {0}")]
    Seed(#[from] RepoError),

    #[error("failed to prepare image storage: {0}")]
    Images(#[from] ImageError),

    #[error("invalid bind address {0}")]
    Address(String),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// CORS for the configured origins; unparsable entries are skipped.
pub fn configure_cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    let cors = configure_cors(&state.config);

    Router::new()
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/refresh", post(routes::auth::refresh))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route("/api/auth/me", get(routes::auth::me))
        .route("/api/users", get(routes::users::list_users))
        .route(
            "/api/users/{username}",
            get(routes::users::get_user)
                .patch(routes::users::update_user)
                .delete(routes::users::delete_user),
        )
        .route("/api/users/{username}/posts", get(routes::users::list_user_posts))
        .route(
            "/api/posts",
            get(routes::posts::list_posts).post(routes::posts::create_post),
        )
        .route("/api/posts/delete", post(routes::posts::delete_posts))
        .route(
            "/api/posts/{slug}",
            get(routes::posts::get_post)
                .patch(routes::posts::update_post)
                .delete(routes::posts::delete_post),
        )
        .route(
            "/api/categories",
            get(routes::categories::list_categories).post(routes::categories::create_category),
        )
        .route(
            "/api/categories/delete",
            post(routes::categories::delete_categories),
        )
        .route(
            "/api/categories/{slug}",
            get(routes::categories::get_category)
                .patch(routes::categories::update_category)
                .delete(routes::categories::delete_category),
        )
        .route(
            "/api/categories/{slug}/posts",
            get(routes::posts::list_category_posts),
        )
        .route(
            "/api/images",
            get(routes::images::list_images)
                .post(routes::images::upload_image)
                .delete(routes::images::delete_image),
        )
        .route("/api/images/url", get(routes::images::image_url))
        .route("/uploads/{*path}", get(routes::images::serve_image))
        .route("/health", get(routes::health::health_ping))
        .route("/health/ready", get(routes::health::health_ready))
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(cors)
}

/// Connects the configured backends and seeds the initial records.
pub async fn build_state(config: Config) -> Result<AppState, StartupError> {
    let table: Arc<dyn Table> = match &config.table_backend {
        TableBackend::Memory => {
            tracing::warn!("TABLE_BACKEND=memory: data is lost on restart");
            Arc::new(InMemoryTable::new())
        }
        TableBackend::Postgres(db_config) => Arc::new(PgTable::connect(db_config).await?),
    };

    let signer = UrlSigner::new(
        config.jwt_secret.clone(),
        config.public_base_url.clone(),
        config.presigned_url_ttl,
    )?;
    let images: Arc<dyn ImageStore> = match config.storage_type {
        StorageType::Local => Arc::new(LocalImageStore::new(
            config.upload_dir.clone(),
            signer.clone(),
        )),
        StorageType::Memory => Arc::new(InMemoryImageStore::new(signer.clone())),
    };
    images.initialize().await?;

    let repo = Repository::new(table);
    if config.admin.is_none() {
        tracing::warn!("ADMIN_USERNAME/ADMIN_EMAIL/ADMIN_HASH_PASSWORD not set, no admin seeded");
    }
    repo.seed(config.admin.clone()).await?;

    Ok(AppState {
        repo,
        images,
        signer,
        config: Arc::new(config),
    })
}

/// Run the server (used by main).
pub async fn run() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Dropping the guards stops the background log writers.
    let _log_guards = logging::init(config.environment, &config.log_level);

    routes::health::init_start_time();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| StartupError::Address(format!("{}:{}", config.host, config.port)))?;

    let state = build_state(config).await?;
    let app = create_app(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
