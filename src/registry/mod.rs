//! Token registry: owns the token records of one token type.
//!
//! Lifecycle of a record: created by `create` (never from caller-supplied
//! credentials), destroyed by `remove`, by the next `create` for the same
//! owner when the type is unique, or by the store once it expires.
//!
//! Lookup never says which half of a credential was wrong: anything that
//! fails to resolve to an owner is `InvalidCredential`.

pub mod host;
pub mod owner;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{LoggerConfig, TokenConfig};
use crate::errors::{Result, TokenError};
use crate::hashing::CredentialGenerator;
use crate::models::token::is_reserved_field;
use crate::models::{CredentialMode, CredentialPair, TokenFilter, TokenRecord};
use crate::store::TokenStore;

pub use host::{OperationNames, OwnerModel};
pub use owner::{Owner, OwnerStore, TokenOwner};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalResult {
    pub removed: u64,
}

pub struct TokenRegistry {
    config: TokenConfig,
    type_tag: String,
    logger: LoggerConfig,
    store: Arc<dyn TokenStore>,
    generator: CredentialGenerator,
    /// Serialises create/remove per owner within this process.
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
    span: tracing::Span,
}

impl std::fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("config", &self.config)
            .field("type_tag", &self.type_tag)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

impl TokenRegistry {
    pub fn new(
        config: TokenConfig,
        store: Arc<dyn TokenStore>,
        generator: CredentialGenerator,
    ) -> Result<Self> {
        config.validate()?;

        let type_tag = config.type_tag();
        let logger = config.logger.clone().unwrap_or_default();
        let generator = match config.cost_factor {
            Some(cost) => generator.with_cost(cost),
            None => generator,
        };
        let span = tracing::info_span!(
            "token_registry",
            token_type = %type_tag,
            logger = %logger.name,
        );

        Ok(Self {
            config,
            type_tag,
            logger,
            store,
            generator,
            owner_locks: DashMap::new(),
            span,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn generator(&self) -> &CredentialGenerator {
        &self.generator
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    // -- Creation & Removal --

    /// Issue a new token for `owner`. In unique mode every earlier token of
    /// this type for the owner is removed first, and the removal completes
    /// before the new record is inserted.
    ///
    /// `extra` is merged over the configured schema defaults; reserved
    /// fields in it are ignored.
    pub async fn create<O: Owner + ?Sized>(
        &self,
        owner: &O,
        extra: Option<Map<String, Value>>,
    ) -> Result<TokenRecord> {
        let owner_id = valid_owner_id(owner)?;

        async move {
            if !self.config.unique {
                return self.issue(&owner_id, extra).await;
            }
            let lock = self.owner_lock(&owner_id);
            let guard = lock.clone().lock_owned().await;
            let result = self.issue(&owner_id, extra).await;
            drop(guard);
            drop(lock);
            self.release_owner_lock(&owner_id);
            result
        }
        .instrument(self.span.clone())
        .await
    }

    async fn issue(
        &self,
        owner_id: &str,
        extra: Option<Map<String, Value>>,
    ) -> Result<TokenRecord> {
        if self.config.unique {
            self.remove_locked(owner_id).await?;
        }

        let (key, secret, token) = match self.config.mode {
            CredentialMode::KeySecret => {
                let pair = self
                    .generator
                    .generate_key_and_secret(owner_id)
                    .await
                    .map_err(TokenError::generation)?;
                (Some(pair.key), Some(pair.secret), None)
            }
            CredentialMode::SingleToken => {
                let token = self
                    .generator
                    .generate_token(owner_id)
                    .await
                    .map_err(TokenError::generation)?;
                (None, None, Some(token))
            }
        };

        let now = Utc::now();
        let record = TokenRecord {
            id: Uuid::new_v4(),
            type_tag: self.type_tag.clone(),
            owner_id: owner_id.to_string(),
            key,
            secret,
            token,
            valid: true,
            expires_at: self
                .config
                .lifetime()
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| now.checked_add_signed(ttl)),
            created_at: now,
            extra: self.merge_extra(extra),
        };

        self.store.insert(&record).await.map_err(|e| {
            tracing::error!(owner_id, error = %e, "error saving token");
            TokenError::PersistenceFailed(e)
        })?;

        tracing::debug!(owner_id, token_id = %record.id, "token created");
        Ok(record)
    }

    /// Remove every token of this type held by `owner`. Removing when none
    /// exist succeeds with `removed == 0`.
    pub async fn remove<O: Owner + ?Sized>(&self, owner: &O) -> Result<RemovalResult> {
        let owner_id = valid_owner_id(owner)?;

        async move {
            let lock = self.owner_lock(&owner_id);
            let guard = lock.clone().lock_owned().await;
            let result = self.remove_locked(&owner_id).await;
            drop(guard);
            drop(lock);
            self.release_owner_lock(&owner_id);
            result
        }
        .instrument(self.span.clone())
        .await
    }

    async fn remove_locked(&self, owner_id: &str) -> Result<RemovalResult> {
        let filter = TokenFilter::for_type(&self.type_tag).owner(owner_id);
        let removed = self.store.delete(&filter).await.map_err(|e| {
            tracing::error!(owner_id, error = %e, "error removing tokens");
            TokenError::PersistenceFailed(e)
        })?;

        if self.logger.log_removals {
            tracing::info!(owner_id, removed, "removed tokens");
        } else {
            tracing::debug!(owner_id, removed, "removed tokens");
        }
        Ok(RemovalResult { removed })
    }

    // -- Lookup --

    /// Generic lookup. The filter is always scoped to this registry's type.
    pub async fn find(&self, filter: TokenFilter) -> Result<Vec<TokenRecord>> {
        let filter = filter.scoped(&self.type_tag);
        self.store
            .find(&filter)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "error finding tokens");
                TokenError::PersistenceFailed(e)
            })
    }

    /// All tokens held by `owner`; at most one in unique mode.
    pub async fn find_by_owner<O: Owner + ?Sized>(&self, owner: &O) -> Result<Vec<TokenRecord>> {
        let owner_id = valid_owner_id(owner)?;
        self.find(TokenFilter::for_type(&self.type_tag).owner(owner_id))
            .await
    }

    pub async fn find_one_by_owner<O: Owner + ?Sized>(
        &self,
        owner: &O,
    ) -> Result<Option<TokenRecord>> {
        let owner_id = valid_owner_id(owner)?;
        self.find_one(TokenFilter::for_type(&self.type_tag).owner(owner_id))
            .await
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<TokenRecord>> {
        if key.is_empty() {
            return Ok(None);
        }
        self.find_one(TokenFilter::for_type(&self.type_tag).key(key))
            .await
    }

    pub async fn find_by_secret(&self, secret: &str) -> Result<Option<TokenRecord>> {
        if secret.is_empty() {
            return Ok(None);
        }
        self.find_one(TokenFilter::for_type(&self.type_tag).secret(secret))
            .await
    }

    /// Both halves must match the same record; anything else, including a
    /// swapped pair, is `InvalidCredential`.
    pub async fn find_by_key_and_secret(&self, credentials: &CredentialPair) -> Result<TokenRecord> {
        if credentials.key.is_empty() || credentials.secret.is_empty() {
            return Err(TokenError::InvalidCredential);
        }
        let filter = TokenFilter::for_type(&self.type_tag)
            .key(&credentials.key)
            .secret(&credentials.secret);
        self.find_one(filter)
            .await?
            .ok_or(TokenError::InvalidCredential)
    }

    /// Lookup for registries in single-token mode.
    pub async fn find_by_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        if token.is_empty() {
            return Ok(None);
        }
        self.find_one(TokenFilter::for_type(&self.type_tag).token(token))
            .await
    }

    async fn find_one(&self, filter: TokenFilter) -> Result<Option<TokenRecord>> {
        self.store
            .find_one(&filter)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "error finding token");
                TokenError::PersistenceFailed(e)
            })
    }

    // -- Owner resolution --

    /// Resolve a lookup result to its live owning record. A missing record
    /// or a vanished owner are both `InvalidCredential`.
    pub async fn resolve_owner<S: OwnerStore + ?Sized>(
        &self,
        record: Option<&TokenRecord>,
        owners: &S,
    ) -> Result<S::Owner> {
        let record = record.ok_or(TokenError::InvalidCredential)?;
        match owners.find_owner(&record.owner_id).await {
            Ok(Some(owner)) => Ok(owner),
            Ok(None) => {
                tracing::warn!(
                    parent: &self.span,
                    owner_id = %record.owner_id,
                    token_id = %record.id,
                    "token refers to a missing owner"
                );
                Err(TokenError::InvalidCredential)
            }
            Err(e) => {
                tracing::error!(parent: &self.span, error = %e, "error loading token owner");
                Err(TokenError::PersistenceFailed(e))
            }
        }
    }

    pub async fn owner_by_key<S: OwnerStore + ?Sized>(&self, key: &str, owners: &S) -> Result<S::Owner> {
        let record = self.find_by_key(key).await?;
        self.resolve_owner(record.as_ref(), owners).await
    }

    pub async fn owner_by_secret<S: OwnerStore + ?Sized>(
        &self,
        secret: &str,
        owners: &S,
    ) -> Result<S::Owner> {
        let record = self.find_by_secret(secret).await?;
        self.resolve_owner(record.as_ref(), owners).await
    }

    pub async fn owner_by_credentials<S: OwnerStore + ?Sized>(
        &self,
        credentials: &CredentialPair,
        owners: &S,
    ) -> Result<S::Owner> {
        let record = self.find_by_key_and_secret(credentials).await?;
        self.resolve_owner(Some(&record), owners).await
    }

    pub async fn owner_by_token<S: OwnerStore + ?Sized>(
        &self,
        token: &str,
        owners: &S,
    ) -> Result<S::Owner> {
        let record = self.find_by_token(token).await?;
        self.resolve_owner(record.as_ref(), owners).await
    }

    // -- Internals --

    fn merge_extra(&self, extra: Option<Map<String, Value>>) -> Map<String, Value> {
        let mut fields = self.config.schema.clone();
        for (name, value) in extra.unwrap_or_default() {
            if is_reserved_field(&name) {
                tracing::warn!(field = %name, "ignoring reserved field in token extras");
                continue;
            }
            fields.insert(name, value);
        }
        fields
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the owner's lock entry once nobody else holds it.
    fn release_owner_lock(&self, owner_id: &str) {
        self.owner_locks
            .remove_if(owner_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn valid_owner_id<O: Owner + ?Sized>(owner: &O) -> Result<String> {
    let id = owner.owner_id();
    if id.trim().is_empty() {
        return Err(TokenError::InvalidOwner);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::Sha256Backend;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn registry(config: TokenConfig) -> TokenRegistry {
        let generator = CredentialGenerator::new(Arc::new(Sha256Backend::new()));
        TokenRegistry::new(config, Arc::new(MemoryStore::new()), generator).unwrap()
    }

    #[tokio::test]
    async fn test_create_sets_core_fields() {
        let reg = registry(TokenConfig::new("ApiAccess"));
        let rec = reg.create("owner-1", None).await.unwrap();

        assert_eq!(rec.owner_id, "owner-1");
        assert_eq!(rec.type_tag, "apiaccess");
        assert!(rec.valid);
        assert!(rec.expires_at.is_none());
        assert!(rec.token.is_none());
        let pair = rec.credentials().unwrap();
        assert_ne!(pair.key, pair.secret);
    }

    #[tokio::test]
    async fn test_rejects_absent_owner() {
        let reg = registry(TokenConfig::new("ApiAccess"));
        assert!(matches!(
            reg.create("", None).await,
            Err(TokenError::InvalidOwner)
        ));
        assert!(matches!(
            reg.create(&None::<Uuid>, None).await,
            Err(TokenError::InvalidOwner)
        ));
        assert!(matches!(reg.remove("  ").await, Err(TokenError::InvalidOwner)));
    }

    #[tokio::test]
    async fn test_extra_fields_merge_over_schema() {
        let config = TokenConfig::new("Reset")
            .schema_field("purpose", json!("reset"))
            .schema_field("attempts", json!(0));
        let reg = registry(config);

        let mut extra = Map::new();
        extra.insert("attempts".into(), json!(3));
        extra.insert("key".into(), json!("forged"));
        extra.insert("owner_id".into(), json!("someone-else"));
        let rec = reg.create("owner-1", Some(extra)).await.unwrap();

        assert_eq!(rec.extra["purpose"], json!("reset"));
        assert_eq!(rec.extra["attempts"], json!(3));
        assert!(!rec.extra.contains_key("key"));
        assert_eq!(rec.owner_id, "owner-1");
        assert_ne!(rec.key.as_deref(), Some("forged"));
    }

    #[tokio::test]
    async fn test_expiry_is_stamped() {
        let reg = registry(TokenConfig::new("Reset").expire_after(Duration::from_secs(60)));
        let rec = reg.create("owner-1", None).await.unwrap();
        let expires = rec.expires_at.unwrap();
        let ttl = expires - rec.created_at;
        assert_eq!(ttl.num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_single_token_mode() {
        let reg = registry(TokenConfig::new("Legacy").mode(CredentialMode::SingleToken));
        let rec = reg.create("owner-1", None).await.unwrap();
        assert!(rec.key.is_none() && rec.secret.is_none());
        let token = rec.token.clone().unwrap();

        let found = reg.find_by_token(&token).await.unwrap().unwrap();
        assert_eq!(found.id, rec.id);
        assert!(reg.find_by_token("nope").await.unwrap().is_none());
        assert!(reg.find_by_token("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_lookups_never_match() {
        let reg = registry(TokenConfig::new("ApiAccess"));
        reg.create("owner-1", None).await.unwrap();
        assert!(reg.find_by_key("").await.unwrap().is_none());
        assert!(reg.find_by_secret("").await.unwrap().is_none());
        let empty = CredentialPair {
            key: String::new(),
            secret: String::new(),
        };
        assert!(matches!(
            reg.find_by_key_and_secret(&empty).await,
            Err(TokenError::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn test_owner_locks_are_released() {
        let reg = registry(TokenConfig::new("ApiAccess"));
        reg.create("owner-1", None).await.unwrap();
        reg.remove("owner-1").await.unwrap();
        assert!(reg.owner_locks.is_empty());
    }
}
