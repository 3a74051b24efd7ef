//! Persisted token record and the filters used to query it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Field names owned by the registry. Extension fields may never use them.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "type",
    "type_tag",
    "owner_id",
    "key",
    "secret",
    "token",
    "valid",
    "expires_at",
    "created_at",
];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// How a registry issues credentials. A registry uses exactly one mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    #[default]
    KeySecret,
    /// Legacy: one opaque `token` value per record.
    SingleToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub key: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Caller-defined extension fields, opaque to the registry.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_valid() -> bool {
    true
}

impl TokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The key/secret pair, if this record was issued in key/secret mode.
    pub fn credentials(&self) -> Option<CredentialPair> {
        match (&self.key, &self.secret) {
            (Some(key), Some(secret)) => Some(CredentialPair {
                key: key.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }
}

/// Exact-match query over one token type. Every populated field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenFilter {
    pub type_tag: String,
    pub owner_id: Option<String>,
    pub key: Option<String>,
    pub secret: Option<String>,
    pub token: Option<String>,
    pub valid: Option<bool>,
    pub extra: Map<String, Value>,
}

impl TokenFilter {
    pub fn for_type(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Re-scope a caller-supplied filter to a registry's own type tag.
    pub(crate) fn scoped(mut self, type_tag: &str) -> Self {
        self.type_tag = type_tag.to_string();
        self
    }

    /// In-process evaluation, used by stores without a query language.
    pub fn matches(&self, record: &TokenRecord) -> bool {
        record.type_tag == self.type_tag
            && self
                .owner_id
                .as_deref()
                .map_or(true, |id| id == record.owner_id)
            && credential_matches(self.key.as_deref(), record.key.as_deref())
            && credential_matches(self.secret.as_deref(), record.secret.as_deref())
            && credential_matches(self.token.as_deref(), record.token.as_deref())
            && self.valid.map_or(true, |v| v == record.valid)
            && self
                .extra
                .iter()
                .all(|(name, value)| record.extra.get(name) == Some(value))
    }
}

fn credential_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(w), Some(a)) => w.len() == a.len() && bool::from(w.as_bytes().ct_eq(a.as_bytes())),
    }
}
