pub mod token;

pub use token::{CredentialMode, CredentialPair, TokenFilter, TokenRecord};
