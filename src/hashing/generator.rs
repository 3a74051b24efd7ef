//! Credential generation: salted hashes with one salt cached per cost factor.
//!
//! Every hash at a given cost factor reuses the same salt for the lifetime of
//! the cache. That keeps token issuance cheap and makes `secret = hash(key)`
//! reproducible, at the price of salts not being unique per value. These are
//! opaque token identifiers, not stored passwords.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::HashBackend;
use crate::config::DEFAULT_COST_FACTOR;
use crate::errors::{Result, TokenError};
use crate::models::CredentialPair;

/// Cost factor → salt. Entries are written once and then only read.
#[derive(Debug, Default)]
pub struct SaltCache {
    salts: DashMap<u32, String>,
}

impl SaltCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cost: u32) -> Option<String> {
        self.salts.get(&cost).map(|s| s.value().clone())
    }

    /// Store `salt` unless another caller got there first; returns the
    /// value that settled in the cache.
    pub fn settle(&self, cost: u32, salt: String) -> String {
        self.salts.entry(cost).or_insert(salt).value().clone()
    }

    pub fn len(&self) -> usize {
        self.salts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.salts.is_empty()
    }
}

/// Produces key/secret pairs and single tokens. Cheap to clone; clones share
/// the backend and the salt cache.
#[derive(Clone)]
pub struct CredentialGenerator {
    backend: Arc<dyn HashBackend>,
    salts: Arc<SaltCache>,
    cost: u32,
}

impl CredentialGenerator {
    pub fn new(backend: Arc<dyn HashBackend>) -> Self {
        Self::with_cache(backend, Arc::new(SaltCache::new()))
    }

    pub fn with_cache(backend: Arc<dyn HashBackend>, salts: Arc<SaltCache>) -> Self {
        Self {
            backend,
            salts,
            cost: DEFAULT_COST_FACTOR,
        }
    }

    /// Cost factor used by `generate_key_and_secret` and `generate_token`.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn salt_cache(&self) -> &Arc<SaltCache> {
        &self.salts
    }

    /// Salt for `cost`, generated on first use and cached afterwards.
    /// A failed generation is not cached.
    pub async fn salt_for(&self, cost: u32) -> Result<String> {
        if let Some(salt) = self.salts.get(cost) {
            return Ok(salt);
        }

        let fresh = self.backend.gen_salt(cost).await.map_err(|e| {
            tracing::error!(cost, error = %e, "error generating salt");
            TokenError::SaltGenerationFailed(e)
        })?;
        Ok(self.salts.settle(cost, fresh))
    }

    pub async fn hash(&self, input: &str, cost: u32) -> Result<String> {
        let salt = self.salt_for(cost).await?;
        self.backend.hash(input, &salt).await.map_err(|e| {
            tracing::error!(cost, error = %e, "error generating hash");
            TokenError::HashGenerationFailed(e)
        })
    }

    /// `key = hash(owner_id + timestamp + nonce)`, then `secret = hash(key)`.
    /// The secret depends on the key, so the two hashes run in sequence.
    pub async fn generate_key_and_secret(&self, owner_id: &str) -> Result<CredentialPair> {
        let key = self.hash(&seed(owner_id), self.cost).await?;
        let secret = self.hash(&key, self.cost).await?;
        Ok(CredentialPair { key, secret })
    }

    /// Single opaque token for registries in legacy single-token mode.
    pub async fn generate_token(&self, owner_id: &str) -> Result<String> {
        self.hash(&seed(owner_id), self.cost).await
    }

    /// True when `secret` is exactly `hash(key)` under this generator's salt.
    pub async fn verify_secret(&self, key: &str, secret: &str) -> Result<bool> {
        let expected = self.hash(key, self.cost).await?;
        Ok(expected.len() == secret.len()
            && bool::from(expected.as_bytes().ct_eq(secret.as_bytes())))
    }
}

fn seed(owner_id: &str) -> String {
    let now = Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros());
    // The nonce keeps two tokens issued within one clock tick apart.
    format!("{}{}{}", owner_id, nanos, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::Sha256Backend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts salt generations and can be told to fail them.
    struct CountingBackend {
        inner: Sha256Backend,
        salts: AtomicUsize,
        fail_salts: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                inner: Sha256Backend::new(),
                salts: AtomicUsize::new(0),
                fail_salts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HashBackend for CountingBackend {
        async fn gen_salt(&self, cost: u32) -> anyhow::Result<String> {
            self.salts.fetch_add(1, Ordering::SeqCst);
            if self.fail_salts.load(Ordering::SeqCst) > 0 {
                self.fail_salts.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("entropy unavailable");
            }
            self.inner.gen_salt(cost).await
        }

        async fn hash(&self, input: &str, salt: &str) -> anyhow::Result<String> {
            self.inner.hash(input, salt).await
        }
    }

    #[tokio::test]
    async fn test_salt_is_cached_per_cost() {
        let backend = Arc::new(CountingBackend::new());
        let gen = CredentialGenerator::new(backend.clone());

        let a = gen.salt_for(1).await.unwrap();
        let b = gen.salt_for(1).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.salts.load(Ordering::SeqCst), 1);

        let c = gen.salt_for(2).await.unwrap();
        assert_ne!(a, c);
        assert_eq!(backend.salts.load(Ordering::SeqCst), 2);
        assert_eq!(gen.salt_cache().len(), 2);
    }

    #[tokio::test]
    async fn test_salt_failure_is_not_cached() {
        let backend = Arc::new(CountingBackend::new());
        backend.fail_salts.store(1, Ordering::SeqCst);
        let gen = CredentialGenerator::new(backend.clone());

        let err = gen.salt_for(1).await.unwrap_err();
        assert!(matches!(err, TokenError::SaltGenerationFailed(_)));
        assert!(gen.salt_cache().is_empty());

        assert!(gen.salt_for(1).await.is_ok());
        assert_eq!(backend.salts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_cache_across_generators() {
        let cache = Arc::new(SaltCache::new());
        let backend = Arc::new(CountingBackend::new());
        let one = CredentialGenerator::with_cache(backend.clone(), cache.clone());
        let two = CredentialGenerator::with_cache(backend.clone(), cache);

        assert_eq!(one.salt_for(1).await.unwrap(), two.salt_for(1).await.unwrap());
        assert_eq!(backend.salts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secret_is_hash_of_key() {
        let gen = CredentialGenerator::new(Arc::new(Sha256Backend::new()));
        let pair = gen.generate_key_and_secret("owner-1").await.unwrap();

        assert_ne!(pair.key, pair.secret);
        assert_eq!(pair.secret, gen.hash(&pair.key, gen.cost()).await.unwrap());
        assert!(gen.verify_secret(&pair.key, &pair.secret).await.unwrap());
        assert!(!gen.verify_secret(&pair.secret, &pair.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_pairs_differ_for_same_owner() {
        let gen = CredentialGenerator::new(Arc::new(Sha256Backend::new()));
        let a = gen.generate_key_and_secret("owner-1").await.unwrap();
        let b = gen.generate_key_and_secret("owner-1").await.unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.secret, b.secret);

        let t1 = gen.generate_token("owner-1").await.unwrap();
        let t2 = gen.generate_token("owner-1").await.unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_settle_keeps_first_writer() {
        let cache = SaltCache::new();
        assert_eq!(cache.settle(1, "first".into()), "first");
        assert_eq!(cache.settle(1, "second".into()), "first");
        assert_eq!(cache.get(1).as_deref(), Some("first"));
    }
}
