//! Environment-driven configuration, loaded once in `run()` and passed down.

use std::path::PathBuf;
use thiserror::Error;

use crate::db::DbConfig;
use crate::repository::AdminSeed;

pub const DEFAULT_JWT_SECRET: &str = "default-jwt-secret-change-in-production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("JWT_SECRET must be set to a secure, unique value in production")]
    InsecureJwtSecret,

    #[error("DATABASE_URL is required when TABLE_BACKEND=postgres")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone)]
pub enum TableBackend {
    Memory,
    Postgres(DbConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub log_level: String,
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub table_backend: TableBackend,
    pub storage_type: StorageType,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub presigned_url_ttl: chrono::Duration,
    pub allowed_origins: Vec<String>,
    pub admin: Option<AdminSeed>,
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            reason: "not a valid number",
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("ENVIRONMENT").as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| {
            if environment.is_production() {
                "info".to_string()
            } else {
                "debug".to_string()
            }
        });

        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string());
        if environment.is_production() && jwt_secret == DEFAULT_JWT_SECRET {
            return Err(ConfigError::InsecureJwtSecret);
        }

        let table_backend = match lookup("TABLE_BACKEND").as_deref() {
            None | Some("memory") => TableBackend::Memory,
            Some("postgres") => {
                let defaults = DbConfig::default();
                TableBackend::Postgres(DbConfig {
                    url: lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?,
                    max_connections: parse_or(&lookup, "DB_POOL_MAX", defaults.max_connections)?,
                    min_connections: parse_or(&lookup, "DB_POOL_MIN", defaults.min_connections)?,
                    connect_timeout_secs: parse_or(
                        &lookup,
                        "DB_CONNECT_TIMEOUT",
                        defaults.connect_timeout_secs,
                    )?,
                    idle_timeout_secs: parse_or(
                        &lookup,
                        "DB_IDLE_TIMEOUT",
                        defaults.idle_timeout_secs,
                    )?,
                })
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "TABLE_BACKEND",
                    value: other.to_string(),
                    reason: "expected 'memory' or 'postgres'",
                })
            }
        };

        let storage_type = match lookup("STORAGE_TYPE").as_deref() {
            None | Some("local") => StorageType::Local,
            Some("memory") => StorageType::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORAGE_TYPE",
                    value: other.to_string(),
                    reason: "expected 'local' or 'memory'",
                })
            }
        };

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 8080u16)?;
        let public_base_url =
            lookup("PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://{host}:{port}"));

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        let admin = match (
            lookup("ADMIN_USERNAME"),
            lookup("ADMIN_EMAIL"),
            lookup("ADMIN_HASH_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password_hash)) => Some(AdminSeed {
                username,
                email,
                password_hash,
            }),
            _ => None,
        };

        Ok(Self {
            host,
            port,
            environment,
            log_level,
            jwt_secret,
            access_token_ttl: chrono::Duration::minutes(parse_or(
                &lookup,
                "ACCESS_TOKEN_TTL_MINUTES",
                15,
            )?),
            refresh_token_ttl: chrono::Duration::days(parse_or(
                &lookup,
                "REFRESH_TOKEN_TTL_DAYS",
                7,
            )?),
            table_backend,
            storage_type,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            public_base_url,
            presigned_url_ttl: chrono::Duration::minutes(parse_or(
                &lookup,
                "PRESIGNED_URL_TTL_MINUTES",
                15,
            )?),
            allowed_origins,
            admin,
        })
    }

    /// Configuration for tests: memory backends, fixed secret.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::from_lookup(|key| match key {
            "JWT_SECRET" => Some("test-secret".to_string()),
            "STORAGE_TYPE" => Some("memory".to_string()),
            _ => None,
        })
        .expect("test configuration is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.access_token_ttl, chrono::Duration::minutes(15));
        assert_eq!(config.refresh_token_ttl, chrono::Duration::days(7));
        assert!(matches!(config.table_backend, TableBackend::Memory));
        assert_eq!(config.storage_type, StorageType::Local);
        assert_eq!(config.public_base_url, "http://127.0.0.1:8080");
        assert!(config.admin.is_none());
    }

    #[test]
    fn test_production_refuses_default_secret() {
        let err = Config::from_lookup(lookup(&[("ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::InsecureJwtSecret));

        let config = Config::from_lookup(lookup(&[
            ("ENVIRONMENT", "production"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let err = Config::from_lookup(lookup(&[("TABLE_BACKEND", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl));

        let config = Config::from_lookup(lookup(&[
            ("TABLE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgresql://db/blog"),
            ("DB_POOL_MAX", "20"),
        ]))
        .unwrap();
        let TableBackend::Postgres(db) = config.table_backend else {
            panic!("expected postgres backend");
        };
        assert_eq!(db.url, "postgresql://db/blog");
        assert_eq!(db.max_connections, 20);
        assert_eq!(db.min_connections, 2);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("PORT", "eighty")])),
            Err(ConfigError::Invalid { var: "PORT", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("STORAGE_TYPE", "s3")])),
            Err(ConfigError::Invalid { var: "STORAGE_TYPE", .. })
        ));
    }

    #[test]
    fn test_admin_seed_needs_all_three() {
        let partial = Config::from_lookup(lookup(&[("ADMIN_USERNAME", "root")])).unwrap();
        assert!(partial.admin.is_none());

        let full = Config::from_lookup(lookup(&[
            ("ADMIN_USERNAME", "root"),
            ("ADMIN_EMAIL", "root@example.com"),
            ("ADMIN_HASH_PASSWORD", "$2b$12$x"),
        ]))
        .unwrap();
        assert_eq!(full.admin.unwrap().username, "root");
    }

    #[test]
    fn test_allowed_origins_split() {
        let config = Config::from_lookup(lookup(&[(
            "ALLOWED_ORIGINS",
            "https://a.example, https://b.example,,",
        )]))
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }
}
