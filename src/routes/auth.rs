/**
 * Authentication Routes
 * Registration, login, token refresh and logout, plus the bearer-token extractor
 */
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};
use crate::config::Config;
use crate::domain::{Role, User};
use crate::dto::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse, UserDto};
use crate::error::RepoError;

const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// Tokens
// ============================================================================

/// JWT claims; `sub` is the username.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

pub fn create_access_token(
    config: &Config,
    user: &User,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.username.clone(),
        role: user.role,
        exp: (now + config.access_token_ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_access_token(
    config: &Config,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Opaque refresh token; only its SHA-256 is persisted.
pub fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// bcrypt is CPU-bound; run it off the async executor.
pub async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| ApiError::Internal(format!("failed to hash password: {e}")))
}

async fn verify_password(password: String, password_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

pub fn validate_password(password: &str) -> ApiResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }
    Ok(())
}

// ============================================================================
// Extractor
// ============================================================================

/// The caller, resolved from `Authorization: Bearer <jwt>`.
///
/// The user is re-read on every request so role changes and deletions take
/// effect before the token expires.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn username(&self) -> &str {
        &self.0.username
    }

    pub fn is_admin(&self) -> bool {
        self.0.is_admin()
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Administrator role required".into()))
        }
    }

    /// Passes when the caller is `owner` or an administrator.
    pub fn require_owner_or_admin(&self, owner: &str) -> ApiResult<()> {
        if self.is_admin() || self.username() == owner {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Only '{owner}' or an administrator may do this"
            )))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Authorization required".into()))?;

        let claims = verify_access_token(&state.config, token)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;

        match state.repo.get_user_by_username(&claims.sub).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(RepoError::NotFound { .. }) => {
                Err(ApiError::Unauthorized("Account no longer exists".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn issue_tokens(state: &AppState, user: User) -> ApiResult<TokenResponse> {
    let access_token = create_access_token(&state.config, &user)
        .map_err(|e| ApiError::Internal(format!("failed to sign access token: {e}")))?;
    let refresh_token = generate_refresh_token();
    state
        .repo
        .update_refresh_token(
            &user.username,
            &refresh_token,
            Utc::now() + state.config.refresh_token_ttl,
        )
        .await?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl.num_seconds(),
        user: UserDto::from(&user),
    })
}

/// POST /api/auth/register - open registration, always as an author
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(ApiError::BadRequest("Username and email are required".into()));
    }
    validate_password(&payload.password)?;

    let password_hash = hash_password(payload.password).await?;
    let user = state
        .repo
        .create_user(User::new(payload.username.trim(), payload.email, password_hash))
        .await?;

    Ok((StatusCode::CREATED, Json(UserDto::from(&user))))
}

/// POST /api/auth/login - `identifier` may be a username or an email
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let identifier = payload.identifier.trim();
    if identifier.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("Identifier and password are required".into()));
    }

    let lookup = if identifier.contains('@') {
        state.repo.get_user_by_email(identifier).await
    } else {
        state.repo.get_user_by_username(identifier).await
    };
    let user = match lookup {
        Ok(user) => user,
        Err(RepoError::NotFound { .. }) => {
            tracing::warn!(identifier, "login for unknown account");
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_password(payload.password, user.password_hash.clone()).await {
        tracing::warn!(username = %user.username, "failed login attempt");
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }

    tracing::info!(username = %user.username, "user logged in");
    Ok(Json(issue_tokens(&state, user).await?))
}

/// POST /api/auth/refresh - rotates the refresh token
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    if payload.refresh_token.is_empty() {
        return Err(ApiError::BadRequest("Refresh token is required".into()));
    }

    let user = match state.repo.get_user_by_refresh_token(&payload.refresh_token).await {
        Ok(user) => user,
        Err(RepoError::NotFound { .. }) => {
            return Err(ApiError::Unauthorized("Invalid refresh token".into()))
        }
        Err(e) => return Err(e.into()),
    };

    let expired = user
        .refresh_token_expires_at
        .map_or(true, |expires_at| expires_at <= Utc::now());
    if expired {
        state.repo.clear_refresh_token(&user.username).await?;
        return Err(ApiError::Unauthorized("Refresh token expired".into()));
    }

    Ok(Json(issue_tokens(&state, user).await?))
}

/// POST /api/auth/logout - revokes the caller's refresh token
pub async fn logout(
    State(state): State<AppState>,
    caller: AuthUser,
) -> ApiResult<StatusCode> {
    state.repo.clear_refresh_token(caller.username()).await?;
    tracing::info!(username = caller.username(), "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(caller: AuthUser) -> Json<UserDto> {
    Json(UserDto::from(&caller.0))
}
