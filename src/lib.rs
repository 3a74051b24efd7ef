//! Opaque key/secret credential tokens bound to owning records.
//!
//! Attach token types to an [`registry::OwnerModel`], then issue, look up and
//! revoke tokens through the returned [`registry::TokenRegistry`].

pub mod config;
pub mod errors;
pub mod hashing;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod registry;
pub mod store;

pub use config::TokenConfig;
pub use errors::{Result, TokenError};
pub use hashing::{CredentialGenerator, HashBackend, SaltCache, Sha256Backend};
pub use models::{CredentialMode, CredentialPair, TokenFilter, TokenRecord};
pub use registry::{
    OperationNames, Owner, OwnerModel, OwnerStore, RemovalResult, TokenOwner, TokenRegistry,
};
pub use store::{MemoryStore, PgTokenStore, TokenStore};
