use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::errors::{Result, TokenError};
use crate::hashing::builtin::{MAX_COST, MIN_COST};
use crate::models::token::is_reserved_field;
use crate::models::CredentialMode;

/// Work factor used when a token type does not set one. Tokens are opaque
/// identifiers, not stored passwords, so this stays low.
pub const DEFAULT_COST_FACTOR: u32 = 1;

/// Options supplied once when a token type is attached to an owner model.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Unique name of this token type on its owner model.
    #[serde(alias = "table_name", alias = "tableName", alias = "tokenName")]
    pub token_name: String,
    #[serde(default)]
    pub expire: bool,
    /// Lifetime of a token when `expire` is set.
    #[serde(default = "default_expires", deserialize_with = "deserialize_duration")]
    pub expires: Duration,
    /// At most one token per owner.
    #[serde(default = "default_unique")]
    pub unique: bool,
    #[serde(default)]
    pub mode: CredentialMode,
    /// Extension fields merged into every record, with their default values.
    #[serde(default)]
    pub schema: Map<String, Value>,
    #[serde(default)]
    pub logger: Option<LoggerConfig>,
    /// Overrides the owner model's cost factor for this token type.
    #[serde(default)]
    pub cost_factor: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_logger_name")]
    pub name: String,
    /// Emit removals at info instead of debug.
    #[serde(default)]
    pub log_removals: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: default_logger_name(),
            log_removals: false,
        }
    }
}

fn default_expires() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_unique() -> bool {
    true
}

fn default_logger_name() -> String {
    "TokenRegistry".to_string()
}

impl TokenConfig {
    pub fn new(token_name: impl Into<String>) -> Self {
        Self {
            token_name: token_name.into(),
            expire: false,
            expires: default_expires(),
            unique: default_unique(),
            mode: CredentialMode::default(),
            schema: Map::new(),
            logger: None,
            cost_factor: None,
        }
    }

    pub fn expire_after(mut self, expires: Duration) -> Self {
        self.expire = true;
        self.expires = expires;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn mode(mut self, mode: CredentialMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn schema_field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.schema.insert(name.into(), default);
        self
    }

    pub fn logger(mut self, logger: LoggerConfig) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn cost_factor(mut self, cost: u32) -> Self {
        self.cost_factor = Some(cost);
        self
    }

    /// Lower-cased name; doubles as the record type tag and collection name.
    pub fn type_tag(&self) -> String {
        self.token_name.trim().to_lowercase()
    }

    /// Expiry lifetime, only when expiry is enabled.
    pub fn lifetime(&self) -> Option<Duration> {
        self.expire.then_some(self.expires)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_name.trim().is_empty() {
            return Err(TokenError::MissingTokenName);
        }
        if let Some(field) = self.schema.keys().find(|f| is_reserved_field(f)) {
            return Err(TokenError::ReservedField {
                field: field.clone(),
            });
        }
        if let Some(cost) = self.cost_factor {
            check_cost_factor(cost)?;
        }
        Ok(())
    }
}

/// Token types declared in a YAML file for one owner model.
#[derive(Debug, Deserialize)]
pub struct TokenTypesFile {
    #[serde(default)]
    pub model: Option<String>,
    pub tokens: Vec<TokenConfig>,
}

pub fn load_token_types(path: &Path) -> anyhow::Result<TokenTypesFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading token types from {}", path.display()))?;
    let file: TokenTypesFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing token types in {}", path.display()))?;
    for token in &file.tokens {
        token.validate()?;
    }
    Ok(file)
}

/// Cost factors must lie in the range the built-in hash backend accepts.
pub fn check_cost_factor(cost: u32) -> Result<()> {
    if (MIN_COST..=MAX_COST).contains(&cost) {
        Ok(())
    } else {
        Err(TokenError::InvalidCostFactor { cost })
    }
}

/// Process-level settings for the `tokenbind` binary.
#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub token_types_path: PathBuf,
    pub cost_factor: u32,
    /// How often expired rows are purged. 0 = never.
    pub sweep_interval_secs: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let cfg = Config {
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/tokenbind".into()),
        token_types_path: std::env::var("TOKENBIND_TOKEN_TYPES")
            .unwrap_or_else(|_| "tokens.yaml".into())
            .into(),
        cost_factor: std::env::var("TOKENBIND_COST_FACTOR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COST_FACTOR),
        sweep_interval_secs: std::env::var("TOKENBIND_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    };
    check_cost_factor(cfg.cost_factor).context("TOKENBIND_COST_FACTOR")?;
    Ok(cfg)
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a human-readable duration such as `30s`, `15m`, `1h30m` or `2d`.
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("duration cannot be empty");
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => anyhow::bail!("invalid duration unit '{}' in '{}'", c, input),
        };
        if digits.is_empty() {
            anyhow::bail!("missing number before '{}' in '{}'", c, input);
        }
        let n: u64 = digits.parse()?;
        total = total.saturating_add(n.saturating_mul(unit));
        digits.clear();
    }
    if !digits.is_empty() {
        anyhow::bail!("missing unit after '{}' in '{}'", digits, input);
    }
    Ok(Duration::from_secs(total))
}
