//! Traits tying tokens to the records that own them.

use async_trait::async_trait;
use uuid::Uuid;

use super::{RemovalResult, TokenRegistry};
use crate::errors::Result;
use crate::models::TokenRecord;

/// Anything a token can be issued for. Only a stable identifier is needed.
pub trait Owner {
    /// String form of the owning record's primary key. Empty means absent.
    fn owner_id(&self) -> String;
}

impl Owner for str {
    fn owner_id(&self) -> String {
        self.to_string()
    }
}

impl Owner for String {
    fn owner_id(&self) -> String {
        self.clone()
    }
}

impl Owner for Uuid {
    fn owner_id(&self) -> String {
        self.to_string()
    }
}

impl<T: Owner + ?Sized> Owner for &T {
    fn owner_id(&self) -> String {
        (**self).owner_id()
    }
}

impl<T: Owner> Owner for Option<T> {
    fn owner_id(&self) -> String {
        self.as_ref().map(Owner::owner_id).unwrap_or_default()
    }
}

/// Caller-side lookup of owning records by identifier.
#[async_trait]
pub trait OwnerStore: Send + Sync {
    type Owner: Send;

    async fn find_owner(&self, owner_id: &str) -> anyhow::Result<Option<Self::Owner>>;
}

/// Instance-side token operations, available on every owner.
///
/// `user.create_token(&registry)` is the same as `registry.create(&user, None)`.
#[async_trait]
pub trait TokenOwner: Owner + Sync {
    async fn create_token(&self, registry: &TokenRegistry) -> Result<TokenRecord> {
        registry.create(self, None).await
    }

    async fn remove_token(&self, registry: &TokenRegistry) -> Result<RemovalResult> {
        registry.remove(self).await
    }

    async fn find_tokens(&self, registry: &TokenRegistry) -> Result<Vec<TokenRecord>> {
        registry.find_by_owner(self).await
    }

    async fn find_token(&self, registry: &TokenRegistry) -> Result<Option<TokenRecord>> {
        registry.find_one_by_owner(self).await
    }
}

impl<T: Owner + Sync> TokenOwner for T {}
