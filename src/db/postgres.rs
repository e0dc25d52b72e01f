use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, Row, Transaction};
use std::time::{Duration, Instant};

use super::{
    check_transaction_size, Attributes, Condition, Index, IndexQuery, Item, Key, StoreError,
    StoreResult, Table, WriteOp, ENTITY_TYPE, GSI1_PK, GSI1_SK, GSI2_PK, GSI2_SK, TYPE_SK,
};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/blog".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_secs: 10,
            idle_timeout_secs: 300,
        }
    }
}

pub async fn init_pool(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Initializing database connection pool...");
    tracing::debug!(
        "Database URL: {}",
        config.url.replace(
            |c: char| !c.is_ascii_alphanumeric() && c != ':' && c != '/' && c != '@' && c != '.',
            "*"
        )
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(1800))
        .test_before_acquire(true)
        .connect(&config.url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    tracing::info!("Database connection pool initialized successfully");
    Ok(pool)
}

/// Creates the single items table and its secondary indexes.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            pk TEXT NOT NULL,
            sk TEXT NOT NULL,
            gsi1pk TEXT,
            gsi1sk TEXT,
            gsi2pk TEXT,
            gsi2sk TEXT,
            entity_type TEXT,
            type_sk TEXT,
            attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
            PRIMARY KEY (pk, sk)
        )
    "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_items_gsi1 ON items(gsi1pk, gsi1sk) WHERE gsi1pk IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_items_gsi2 ON items(gsi2pk, gsi2sk) WHERE gsi2pk IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_items_entity_type ON items(entity_type, type_sk) WHERE entity_type IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Postgres-backed table. Index attributes are mirrored into dedicated columns
/// so the three secondary indexes are plain btree lookups.
#[derive(Debug, Clone)]
pub struct PgTable {
    pool: PgPool,
}

impl PgTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects, migrates and returns a ready table.
    pub async fn connect(config: &DbConfig) -> Result<Self, sqlx::Error> {
        let pool = init_pool(config).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn index_columns(index: Index) -> (&'static str, &'static str) {
    match index {
        Index::ByAuthor => ("gsi1pk", "gsi1sk"),
        Index::ByCategory => ("gsi2pk", "gsi2sk"),
        Index::ByType => ("entity_type", "type_sk"),
    }
}

fn column_value(attributes: &Attributes, name: &str) -> Option<String> {
    attributes.get(name).and_then(Value::as_str).map(str::to_string)
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<Item, sqlx::Error> {
    let pk: String = row.try_get("pk")?;
    let sk: String = row.try_get("sk")?;
    let Json(attributes): Json<Attributes> = row.try_get("attributes")?;
    Ok(Item::new(Key::new(pk, sk), attributes))
}

async fn row_exists(tx: &mut Transaction<'_, Postgres>, key: &Key) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM items WHERE pk = $1 AND sk = $2 FOR UPDATE")
        .bind(&key.pk)
        .bind(&key.sk)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

/// Applies one op inside the open transaction. Returns `false` when the op's
/// guard did not hold.
async fn apply_op(tx: &mut Transaction<'_, Postgres>, op: &WriteOp) -> Result<bool, sqlx::Error> {
    match op {
        WriteOp::Put { item, condition } => {
            let attrs = &item.attributes;
            let sql = match condition {
                Condition::NotExists => {
                    r#"INSERT INTO items (pk, sk, gsi1pk, gsi1sk, gsi2pk, gsi2sk, entity_type, type_sk, attributes)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                       ON CONFLICT (pk, sk) DO NOTHING"#
                }
                Condition::Exists => {
                    r#"UPDATE items
                       SET gsi1pk = $3, gsi1sk = $4, gsi2pk = $5, gsi2sk = $6,
                           entity_type = $7, type_sk = $8, attributes = $9
                       WHERE pk = $1 AND sk = $2"#
                }
                Condition::None => {
                    r#"INSERT INTO items (pk, sk, gsi1pk, gsi1sk, gsi2pk, gsi2sk, entity_type, type_sk, attributes)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                       ON CONFLICT (pk, sk) DO UPDATE
                       SET gsi1pk = EXCLUDED.gsi1pk, gsi1sk = EXCLUDED.gsi1sk,
                           gsi2pk = EXCLUDED.gsi2pk, gsi2sk = EXCLUDED.gsi2sk,
                           entity_type = EXCLUDED.entity_type, type_sk = EXCLUDED.type_sk,
                           attributes = EXCLUDED.attributes"#
                }
            };
            let result = sqlx::query(sql)
                .bind(&item.key.pk)
                .bind(&item.key.sk)
                .bind(column_value(attrs, GSI1_PK))
                .bind(column_value(attrs, GSI1_SK))
                .bind(column_value(attrs, GSI2_PK))
                .bind(column_value(attrs, GSI2_SK))
                .bind(column_value(attrs, ENTITY_TYPE))
                .bind(column_value(attrs, TYPE_SK))
                .bind(Json(attrs))
                .execute(&mut **tx)
                .await?;
            Ok(*condition == Condition::None || result.rows_affected() == 1)
        }
        WriteOp::Update { key, set, condition } => {
            if *condition == Condition::NotExists {
                return Ok(false);
            }
            let result = sqlx::query(
                r#"UPDATE items
                   SET attributes = attributes || $3,
                       gsi1pk = (attributes || $3)->>'GSI1PK',
                       gsi1sk = (attributes || $3)->>'GSI1SK',
                       gsi2pk = (attributes || $3)->>'GSI2PK',
                       gsi2sk = (attributes || $3)->>'GSI2SK',
                       entity_type = (attributes || $3)->>'EntityType',
                       type_sk = (attributes || $3)->>'TypeSK'
                   WHERE pk = $1 AND sk = $2"#,
            )
            .bind(&key.pk)
            .bind(&key.sk)
            .bind(Json(set))
            .execute(&mut **tx)
            .await?;
            Ok(result.rows_affected() == 1)
        }
        WriteOp::Delete { key, condition } => match condition {
            Condition::NotExists => Ok(!row_exists(tx, key).await?),
            _ => {
                let result = sqlx::query("DELETE FROM items WHERE pk = $1 AND sk = $2")
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .execute(&mut **tx)
                    .await?;
                Ok(*condition == Condition::None || result.rows_affected() == 1)
            }
        },
        WriteOp::Check { key, condition } => Ok(condition.holds(row_exists(tx, key).await?)),
    }
}

#[async_trait]
impl Table for PgTable {
    async fn get(&self, key: &Key) -> StoreResult<Option<Item>> {
        let row = sqlx::query("SELECT pk, sk, attributes FROM items WHERE pk = $1 AND sk = $2")
            .bind(&key.pk)
            .bind(&key.sk)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_item).transpose()?)
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        check_transaction_size(&ops, self.max_transaction_items())?;

        let mut tx = self.pool.begin().await?;
        for (index, op) in ops.iter().enumerate() {
            if !apply_op(&mut tx, op).await? {
                tx.rollback().await?;
                tracing::debug!(index, key = %op.key(), "transaction cancelled by condition");
                return Err(StoreError::ConditionFailed {
                    index,
                    key: op.key().to_string(),
                });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, query: &IndexQuery) -> StoreResult<Vec<Item>> {
        let (pk_column, sk_column) = index_columns(query.index);
        let direction = if query.descending { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT pk, sk, attributes FROM items WHERE {pk_column} = $1 \
             ORDER BY {sk_column} {direction}, pk {direction}, sk {direction}"
        );

        let rows = sqlx::query(&sql)
            .bind(&query.partition)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn health_check(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(start.elapsed())
    }
}
