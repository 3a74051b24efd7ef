use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::TokenStore;
use crate::models::{TokenFilter, TokenRecord};

/// In-process token store backed by a DashMap.
///
/// Expired records are hidden on read and dropped lazily; `purge_expired()`
/// sweeps them all and can be driven by `jobs::expiry`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Uuid, TokenRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn remove_where(&self, doomed: impl Fn(&TokenRecord) -> bool) -> u64 {
        let mut removed = 0;
        self.records.retain(|_, record| {
            if doomed(record) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, record: &TokenRecord) -> anyhow::Result<()> {
        match self.records.entry(record.id) {
            Entry::Occupied(_) => anyhow::bail!("duplicate token record id {}", record.id),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn delete(&self, filter: &TokenFilter) -> anyhow::Result<u64> {
        Ok(self.remove_where(|record| filter.matches(record)))
    }

    async fn find(&self, filter: &TokenFilter) -> anyhow::Result<Vec<TokenRecord>> {
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut found: Vec<TokenRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .filter_map(|entry| {
                if entry.value().is_expired_at(now) {
                    expired.push(*entry.key());
                    None
                } else {
                    Some(entry.value().clone())
                }
            })
            .collect();

        // iteration guards are gone; safe to remove now
        for id in expired {
            self.records.remove(&id);
        }

        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let now = Utc::now();
        Ok(self.remove_where(|record| record.is_expired_at(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn record(owner: &str, key: &str) -> TokenRecord {
        TokenRecord {
            id: Uuid::new_v4(),
            type_tag: "session".into(),
            owner_id: owner.into(),
            key: Some(key.into()),
            secret: Some(format!("{key}-secret")),
            token: None,
            valid: true,
            expires_at: None,
            created_at: Utc::now(),
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_find_delete() {
        let store = MemoryStore::new();
        store.insert(&record("a", "k1")).await.unwrap();
        store.insert(&record("a", "k2")).await.unwrap();
        store.insert(&record("b", "k3")).await.unwrap();

        let by_owner = TokenFilter::for_type("session").owner("a");
        assert_eq!(store.find(&by_owner).await.unwrap().len(), 2);

        let one = store
            .find_one(&TokenFilter::for_type("session").key("k3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one.owner_id, "b");

        assert_eq!(store.delete(&by_owner).await.unwrap(), 2);
        assert_eq!(store.delete(&by_owner).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let rec = record("a", "k1");
        store.insert(&rec).await.unwrap();
        assert!(store.insert(&rec).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden_and_purged() {
        let store = MemoryStore::new();
        let mut stale = record("a", "old");
        stale.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        let mut fresh = record("a", "new");
        fresh.expires_at = Some(Utc::now() + chrono::Duration::minutes(5));
        store.insert(&stale).await.unwrap();
        store.insert(&fresh).await.unwrap();

        let found = store
            .find(&TokenFilter::for_type("session").owner("a"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.as_deref(), Some("new"));
        // lazily dropped by the read above
        assert_eq!(store.len(), 1);

        let mut stale = record("b", "old");
        stale.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        store.insert(&stale).await.unwrap();
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_orders_by_creation() {
        let store = MemoryStore::new();
        let mut first = record("a", "k1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = record("a", "k2");
        store.insert(&second).await.unwrap();
        store.insert(&first).await.unwrap();

        let found = store
            .find(&TokenFilter::for_type("session").owner("a"))
            .await
            .unwrap();
        assert_eq!(found[0].key.as_deref(), Some("k1"));
        assert_eq!(found[1].key.as_deref(), Some("k2"));
    }
}
