use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::batch::{delete_in_batches, DeleteGroup};
use super::index::{post_key, to_item, user_key, USER_TYPE};
use super::uniqueness::{claim_owner, Claim};
use super::{map_write_error, Repository};
use crate::db::{Attributes, Condition, Index, WriteOp};
use crate::domain::User;
use crate::error::{BatchDeleteReport, RepoError, RepoResult};

const MAX_USERNAME_LEN: usize = 64;

/// SHA-256 hex digest under which a refresh token is stored.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_username(username: &str) -> RepoResult<()> {
    if username.is_empty() {
        return Err(RepoError::Validation("username must not be empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(RepoError::Validation(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }
    if username.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(RepoError::Validation(
            "username must not contain whitespace or '#'".into(),
        ));
    }
    Ok(())
}

/// Emails are unique case-insensitively.
fn normalize_email(email: &str) -> RepoResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(RepoError::Validation(format!("invalid email address '{email}'"))),
    }
}

fn encode<T: serde::Serialize>(value: T, operation: &'static str, id: &str) -> RepoResult<Value> {
    serde_json::to_value(value).map_err(|e| RepoError::storage(operation, id, e.into()))
}

/// The refresh marker read at the start of the call was removed by a
/// concurrent rotation or logout.
fn stale_refresh_token(username: &str) -> RepoError {
    RepoError::Conflict(format!(
        "refresh token of '{username}' changed concurrently"
    ))
}

impl Repository {
    /// Claims the username and the email in one transaction.
    pub async fn create_user(&self, mut user: User) -> RepoResult<User> {
        validate_username(&user.username)?;
        user.email = normalize_email(&user.email)?;
        if user.password_hash.is_empty() {
            return Err(RepoError::Validation("password hash must not be empty".into()));
        }

        let item = to_item(&user).map_err(|e| RepoError::storage("create_user", &user.username, e))?;
        let ops = vec![
            WriteOp::put(item, Condition::NotExists),
            Claim::Email(&user.email).acquire(Some(&user.username)),
        ];

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "create_user", &user.username, |index| {
                Some(RepoError::Conflict(match index {
                    0 => format!("username '{}' is already taken", user.username),
                    _ => format!("email '{}' is already registered", user.email),
                }))
            })
        })?;

        tracing::info!(username = %user.username, role = %user.role, "user created");
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        self.load(&user_key(username), "get_user_by_username", username)
            .await?
            .ok_or_else(|| RepoError::not_found("user", username))
    }

    /// Resolves the email claim to its username, then loads the user.
    pub async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
        let email = email.trim().to_lowercase();
        let claim = self
            .table
            .get(&Claim::Email(&email).key())
            .await
            .map_err(|e| RepoError::storage("get_user_by_email", &email, e))?
            .ok_or_else(|| RepoError::not_found("user", &email))?;
        let username = claim_owner(&claim).ok_or_else(|| RepoError::not_found("user", &email))?;
        self.get_user_by_username(username).await
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> RepoResult<User> {
        self.get_all_users()
            .await?
            .into_iter()
            .find(|user| user.user_id == user_id)
            .ok_or_else(|| RepoError::not_found("user", user_id.to_string()))
    }

    /// Looks up the holder of a refresh token. A stale lookup record whose
    /// hash no longer matches the user's current one is treated as absent.
    pub async fn get_user_by_refresh_token(&self, token: &str) -> RepoResult<User> {
        let hash = hash_refresh_token(token);
        let marker = self
            .table
            .get(&Claim::RefreshToken(&hash).key())
            .await
            .map_err(|e| RepoError::storage("get_user_by_refresh_token", "<token>", e))?
            .ok_or_else(|| RepoError::not_found("refresh token", "<token>"))?;
        let username = claim_owner(&marker)
            .ok_or_else(|| RepoError::not_found("refresh token", "<token>"))?;

        let user = self.get_user_by_username(username).await?;
        if user.refresh_token_hash.as_deref() != Some(hash.as_str()) {
            return Err(RepoError::not_found("refresh token", "<token>"));
        }
        Ok(user)
    }

    /// All users, ordered by username.
    pub async fn get_all_users(&self) -> RepoResult<Vec<User>> {
        self.list(Index::ByType, USER_TYPE.to_string(), false, "get_all_users")
            .await
    }

    /// Writes the profile fields (email, password hash, role) of an existing
    /// user. Identity, creation time and refresh token are left untouched in
    /// storage. An email change releases the old claim and takes the new one
    /// in the same transaction; if the old claim is already gone another
    /// update won the race and this one fails with `Conflict`.
    pub async fn update_user(&self, user: User) -> RepoResult<User> {
        let email = normalize_email(&user.email)?;
        if user.password_hash.is_empty() {
            return Err(RepoError::Validation("password hash must not be empty".into()));
        }
        let existing = self.get_user_by_username(&user.username).await?;
        let username = existing.username.as_str();
        let updated_at = Utc::now();
        let email_changed = existing.email != email;

        let mut set = Attributes::new();
        set.insert("passwordHash".into(), Value::from(user.password_hash.as_str()));
        set.insert("role".into(), encode(user.role, "update_user", username)?);
        set.insert("updatedAt".into(), encode(updated_at, "update_user", username)?);
        if email_changed {
            set.insert("email".into(), Value::from(email.as_str()));
        }

        let mut ops = vec![WriteOp::Update {
            key: user_key(username),
            set,
            condition: Condition::Exists,
        }];
        if email_changed {
            ops.push(Claim::Email(&existing.email).release());
            ops.push(Claim::Email(&email).acquire(Some(username)));
        }

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "update_user", username, |index| match index {
                0 => Some(RepoError::not_found("user", username)),
                1 => Some(RepoError::Conflict(format!(
                    "user '{username}' was modified concurrently"
                ))),
                2 => Some(RepoError::Conflict(format!(
                    "email '{email}' is already registered"
                ))),
                _ => None,
            })
        })?;

        tracing::info!(username, email_changed, "user updated");
        Ok(User {
            email,
            password_hash: user.password_hash,
            role: user.role,
            updated_at,
            ..existing
        })
    }

    /// Replaces the user's refresh token. Only the token fields and
    /// `updatedAt` are written; the lookup record is swapped atomically.
    pub async fn update_refresh_token(
        &self,
        username: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let existing = self.get_user_by_username(username).await?;
        let hash = hash_refresh_token(token);

        let mut set = Attributes::new();
        set.insert("refreshTokenHash".into(), Value::from(hash.clone()));
        set.insert(
            "refreshTokenExpiresAt".into(),
            encode(expires_at, "update_refresh_token", username)?,
        );
        set.insert("updatedAt".into(), encode(Utc::now(), "update_refresh_token", username)?);

        let mut ops = vec![WriteOp::Update {
            key: user_key(username),
            set,
            condition: Condition::Exists,
        }];
        match existing.refresh_token_hash.as_deref() {
            Some(old) if old == hash => {}
            Some(old) => {
                ops.push(Claim::RefreshToken(old).release());
                ops.push(Claim::RefreshToken(&hash).acquire(Some(username)));
            }
            None => ops.push(Claim::RefreshToken(&hash).acquire(Some(username))),
        }

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "update_refresh_token", username, |index| match index {
                0 => Some(RepoError::not_found("user", username)),
                1 => Some(stale_refresh_token(username)),
                _ => None,
            })
        })?;

        tracing::debug!(username, "refresh token rotated");
        Ok(())
    }

    /// Revokes the current refresh token, if any.
    pub async fn clear_refresh_token(&self, username: &str) -> RepoResult<()> {
        let existing = self.get_user_by_username(username).await?;

        let mut set = Attributes::new();
        set.insert("refreshTokenHash".into(), Value::Null);
        set.insert("refreshTokenExpiresAt".into(), Value::Null);
        set.insert("updatedAt".into(), encode(Utc::now(), "clear_refresh_token", username)?);

        let mut ops = vec![WriteOp::Update {
            key: user_key(username),
            set,
            condition: Condition::Exists,
        }];
        if let Some(old) = existing.refresh_token_hash.as_deref() {
            ops.push(Claim::RefreshToken(old).release());
        }

        self.table.transact_write(ops).await.map_err(|e| {
            map_write_error(e, "clear_refresh_token", username, |index| match index {
                0 => Some(RepoError::not_found("user", username)),
                _ => Some(stale_refresh_token(username)),
            })
        })?;

        tracing::debug!(username, "refresh token cleared");
        Ok(())
    }

    /// Deletes a user who owns no posts. `actor` is the username of the
    /// caller; nobody may delete their own account.
    // A post created between the ownership check and the delete keeps the
    // removed username as its author; the index read cannot be made part of
    // the transaction.
    pub async fn delete_user(&self, username: &str, actor: &str) -> RepoResult<()> {
        if username == actor {
            return Err(RepoError::Conflict("users cannot delete their own account".into()));
        }

        let user = self.get_user_by_username(username).await?;
        let posts = self.get_posts_by_user(username, None).await?;
        if !posts.is_empty() {
            return Err(RepoError::Conflict(format!(
                "user '{username}' still owns {} post(s)",
                posts.len()
            )));
        }

        self.table
            .transact_write(user_delete_ops(&user))
            .await
            .map_err(|e| {
                map_write_error(e, "delete_user", username, |index| {
                    (index == 0).then(|| RepoError::not_found("user", username))
                })
            })?;

        tracing::info!(username, actor, "user deleted");
        Ok(())
    }

    /// Deletes a user together with every post they own.
    ///
    /// Runs in capped batches: posts first, the account last, so an
    /// interrupted purge leaves the account in place and can be retried.
    pub async fn purge_user(&self, username: &str, actor: &str) -> RepoResult<BatchDeleteReport> {
        if username == actor {
            return Err(RepoError::Conflict("users cannot delete their own account".into()));
        }

        let user = self.get_user_by_username(username).await?;
        let posts = self.get_posts_by_user(username, None).await?;

        let mut groups: Vec<DeleteGroup> = posts
            .iter()
            .map(|post| {
                DeleteGroup::new(
                    &post.slug,
                    vec![
                        WriteOp::delete(post_key(&post.slug), Condition::Exists),
                        Claim::PostSlug(&post.slug).release_if_present(),
                    ],
                )
            })
            .collect();
        groups.push(DeleteGroup::new(username, user_delete_ops(&user)));

        tracing::info!(username, actor, posts = posts.len(), "purging user");
        delete_in_batches(self.table.as_ref(), "purge_user", groups).await
    }
}

fn user_delete_ops(user: &User) -> Vec<WriteOp> {
    let mut ops = vec![
        WriteOp::delete(user_key(&user.username), Condition::Exists),
        Claim::Email(&user.email).release_if_present(),
    ];
    if let Some(hash) = user.refresh_token_hash.as_deref() {
        ops.push(Claim::RefreshToken(hash).release_if_present());
    }
    ops
}
