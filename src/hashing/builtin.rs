use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

const SALT_PREFIX: &str = "$s256$";
const SALT_BYTES: usize = 16;
pub const MIN_COST: u32 = 1;
pub const MAX_COST: u32 = 20;

/// Built-in backend: salted SHA-256 iterated `2^cost` times.
///
/// Salt format: `$s256$<cost:02>$<32 hex chars>`.
/// Hash format: `<salt>$<64 hex chars>`.
#[derive(Debug, Clone, Default)]
pub struct Sha256Backend;

impl Sha256Backend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl super::HashBackend for Sha256Backend {
    async fn gen_salt(&self, cost: u32) -> anyhow::Result<String> {
        check_cost(cost)?;
        let mut bytes = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Ok(format!("{}{:02}${}", SALT_PREFIX, cost, hex::encode(bytes)))
    }

    async fn hash(&self, input: &str, salt: &str) -> anyhow::Result<String> {
        let (cost, salt_bytes) = parse_salt(salt)?;
        let input = input.to_owned();
        let salt = salt.to_owned();

        // Stretching is CPU-bound; keep it off the async workers.
        let digest = tokio::task::spawn_blocking(move || stretch(&salt_bytes, &input, cost))
            .await
            .map_err(|e| anyhow::anyhow!("hash task failed: {}", e))?;

        Ok(format!("{}${}", salt, hex::encode(digest)))
    }
}

fn stretch(salt: &[u8], input: &str, cost: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(input.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();

    for _ in 1..(1u64 << cost) {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt);
        hasher.update(input.as_bytes());
        digest = hasher.finalize().into();
    }
    digest
}

fn check_cost(cost: u32) -> anyhow::Result<()> {
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        anyhow::bail!(
            "cost factor must be between {} and {}, got {}",
            MIN_COST,
            MAX_COST,
            cost
        );
    }
    Ok(())
}

/// Split a salt into its cost factor and raw bytes.
pub fn parse_salt(salt: &str) -> anyhow::Result<(u32, Vec<u8>)> {
    let rest = salt
        .strip_prefix(SALT_PREFIX)
        .ok_or_else(|| anyhow::anyhow!("unrecognised salt format"))?;
    let (cost, encoded) = rest
        .split_once('$')
        .ok_or_else(|| anyhow::anyhow!("salt is missing its cost factor"))?;
    let cost: u32 = cost.parse()?;
    check_cost(cost)?;
    let bytes = hex::decode(encoded)?;
    if bytes.len() != SALT_BYTES {
        anyhow::bail!(
            "salt must be {} bytes, got {}",
            SALT_BYTES,
            bytes.len()
        );
    }
    Ok((cost, bytes))
}
