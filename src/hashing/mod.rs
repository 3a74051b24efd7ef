pub mod builtin;
pub mod generator;

use async_trait::async_trait;

pub use builtin::Sha256Backend;
pub use generator::{CredentialGenerator, SaltCache};

/// Abstraction over the one-way hashing primitive.
/// Implementations: Sha256Backend (salted, iterated SHA-256).
#[async_trait]
pub trait HashBackend: Send + Sync {
    /// Produce a fresh salt encoding the given cost factor.
    async fn gen_salt(&self, cost: u32) -> anyhow::Result<String>;

    /// Hash `input` with a salt previously returned by `gen_salt`.
    /// The output embeds the salt, so equal inputs under one salt hash equally.
    async fn hash(&self, input: &str, salt: &str) -> anyhow::Result<String>;
}
