use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::TokenStore;
use crate::models::{TokenFilter, TokenRecord};

const COLUMNS: &str =
    "id, type_tag, owner_id, key, secret, token, valid, expires_at, created_at, extra";

/// PostgreSQL token store. All token types share `credential_tokens`,
/// partitioned by `type_tag`.
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO credential_tokens (id, type_tag, owner_id, key, secret, token, valid, expires_at, created_at, extra)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(record.id)
        .bind(&record.type_tag)
        .bind(&record.owner_id)
        .bind(&record.key)
        .bind(&record.secret)
        .bind(&record.token)
        .bind(record.valid)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(Json(&record.extra))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, filter: &TokenFilter) -> anyhow::Result<u64> {
        let mut qb = delete_query(filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find(&self, filter: &TokenFilter) -> anyhow::Result<Vec<TokenRecord>> {
        let mut qb = select_query(filter, None);
        let rows = qb
            .build_query_as::<TokenRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TokenRecord::from).collect())
    }

    async fn find_one(&self, filter: &TokenFilter) -> anyhow::Result<Option<TokenRecord>> {
        let mut qb = select_query(filter, Some(1));
        let row = qb
            .build_query_as::<TokenRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TokenRecord::from))
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM credential_tokens WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(rows = result.rows_affected(), "purged expired tokens");
        }
        Ok(result.rows_affected())
    }
}

fn select_query(filter: &TokenFilter, limit: Option<i64>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM credential_tokens", COLUMNS));
    push_filter(&mut qb, filter);
    qb.push(" AND (expires_at IS NULL OR expires_at > NOW())");
    qb.push(" ORDER BY created_at ASC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    qb
}

fn delete_query(filter: &TokenFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("DELETE FROM credential_tokens");
    push_filter(&mut qb, filter);
    qb
}

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &TokenFilter) {
    qb.push(" WHERE type_tag = ").push_bind(filter.type_tag.clone());
    if let Some(owner_id) = &filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id.clone());
    }
    if let Some(key) = &filter.key {
        qb.push(" AND key = ").push_bind(key.clone());
    }
    if let Some(secret) = &filter.secret {
        qb.push(" AND secret = ").push_bind(secret.clone());
    }
    if let Some(token) = &filter.token {
        qb.push(" AND token = ").push_bind(token.clone());
    }
    if let Some(valid) = filter.valid {
        qb.push(" AND valid = ").push_bind(valid);
    }
    if !filter.extra.is_empty() {
        qb.push(" AND extra @> ")
            .push_bind(Json(Value::Object(filter.extra.clone())));
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    type_tag: String,
    owner_id: String,
    key: Option<String>,
    secret: Option<String>,
    token: Option<String>,
    valid: bool,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    extra: Json<Map<String, Value>>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            id: row.id,
            type_tag: row.type_tag,
            owner_id: row.owner_id,
            key: row.key,
            secret: row.secret,
            token: row.token,
            valid: row.valid,
            expires_at: row.expires_at,
            created_at: row.created_at,
            extra: row.extra.0,
        }
    }
}
