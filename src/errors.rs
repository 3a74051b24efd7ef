use thiserror::Error;

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Debug, Error)]
pub enum TokenError {
    // ── Configuration (raised at attachment time) ──────────────
    #[error("a token name must be specified when attaching a token type")]
    MissingTokenName,

    #[error("token name '{name}' is not unique on model '{model}'")]
    DuplicateTokenName { model: String, name: String },

    #[error("schema field '{field}' collides with a reserved token field")]
    ReservedField { field: String },

    #[error("cost factor {cost} is outside the supported range")]
    InvalidCostFactor { cost: u32 },

    // ── Operational ────────────────────────────────────────────
    #[error("owner is missing or has no identifier")]
    InvalidOwner,

    #[error("invalid credential")]
    InvalidCredential,

    #[error("credential generation failed: {0}")]
    CredentialGenerationFailed(#[source] Box<TokenError>),

    #[error("salt generation failed: {0}")]
    SaltGenerationFailed(#[source] anyhow::Error),

    #[error("hash generation failed: {0}")]
    HashGenerationFailed(#[source] anyhow::Error),

    #[error("persistence failed: {0}")]
    PersistenceFailed(#[source] anyhow::Error),
}

impl TokenError {
    /// Stable client-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::MissingTokenName => "missing_token_name",
            TokenError::DuplicateTokenName { .. } => "duplicate_token_name",
            TokenError::ReservedField { .. } => "reserved_field",
            TokenError::InvalidCostFactor { .. } => "invalid_cost_factor",
            TokenError::InvalidOwner => "invalid_owner",
            TokenError::InvalidCredential => "invalid_credential",
            TokenError::CredentialGenerationFailed(_) => "credential_generation_failed",
            TokenError::SaltGenerationFailed(_) => "salt_generation_failed",
            TokenError::HashGenerationFailed(_) => "hash_generation_failed",
            TokenError::PersistenceFailed(_) => "persistence_failed",
        }
    }

    /// Configuration errors abort attachment; everything else is operational.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TokenError::MissingTokenName
                | TokenError::DuplicateTokenName { .. }
                | TokenError::ReservedField { .. }
                | TokenError::InvalidCostFactor { .. }
        )
    }

    pub(crate) fn generation(cause: TokenError) -> Self {
        match cause {
            already @ TokenError::CredentialGenerationFailed(_) => already,
            other => TokenError::CredentialGenerationFailed(Box::new(other)),
        }
    }
}
