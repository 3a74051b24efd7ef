pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::{TokenFilter, TokenRecord};

pub use memory::MemoryStore;
pub use postgres::PgTokenStore;

/// Persistent collection of token records.
/// Implementations: MemoryStore (DashMap), PgTokenStore (PostgreSQL).
///
/// Stores own expiry: records past `expires_at` must not be returned by
/// `find`, and `purge_expired` removes them for good.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()>;

    /// Delete every record matching `filter`. Returns the number removed.
    async fn delete(&self, filter: &TokenFilter) -> anyhow::Result<u64>;

    /// All live records matching `filter`, oldest first.
    async fn find(&self, filter: &TokenFilter) -> anyhow::Result<Vec<TokenRecord>>;

    async fn find_one(&self, filter: &TokenFilter) -> anyhow::Result<Option<TokenRecord>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Drop expired records across all token types. Returns the number removed.
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}
