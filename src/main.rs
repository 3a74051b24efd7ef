use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Map;

use tokenbind::config;
use tokenbind::hashing::{CredentialGenerator, Sha256Backend};
use tokenbind::jobs;
use tokenbind::models::{CredentialPair, TokenRecord};
use tokenbind::registry::{OwnerModel, TokenRegistry};
use tokenbind::store::{PgTokenStore, TokenStore};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    tokenbind::logging::init("tokenbind=info", args.json_logs)?;

    let cfg = config::load()?;

    let result = match args.command {
        cli::Commands::Migrate => {
            let store = PgTokenStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            store.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        cli::Commands::Token { command } => {
            let store = PgTokenStore::connect(&cfg.database_url).await?;
            let model = build_model(&cfg, Arc::new(store))?;
            handle_token_command(command, &model).await
        }
        cli::Commands::Hash { input, cost } => {
            let generator = CredentialGenerator::new(Arc::new(Sha256Backend::new()));
            let hash = generator
                .hash(&input, cost.unwrap_or(cfg.cost_factor))
                .await?;
            println!("{}", hash);
            Ok(())
        }
        cli::Commands::Purge { watch } => {
            let store: Arc<dyn TokenStore> =
                Arc::new(PgTokenStore::connect(&cfg.database_url).await?);
            run_purge(store, watch, cfg.sweep_interval_secs).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Attach every token type from the token types file to one owner model.
fn build_model(cfg: &config::Config, store: Arc<dyn TokenStore>) -> anyhow::Result<OwnerModel> {
    let file = config::load_token_types(&cfg.token_types_path)?;
    let generator =
        CredentialGenerator::new(Arc::new(Sha256Backend::new())).with_cost(cfg.cost_factor);
    let model = OwnerModel::new(
        file.model.unwrap_or_else(|| "owner".to_string()),
        store,
        generator,
    );
    for token in file.tokens {
        model.attach(token)?;
    }
    Ok(model)
}

fn registry_for(model: &OwnerModel, name: &str) -> anyhow::Result<Arc<TokenRegistry>> {
    model.registry(name).with_context(|| {
        format!(
            "token type '{}' is not declared; known types: {}",
            name,
            model.token_types().join(", ")
        )
    })
}

async fn handle_token_command(cmd: cli::TokenCommands, model: &OwnerModel) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create {
            name,
            owner,
            fields,
        } => {
            let registry = registry_for(model, &name)?;
            let extra: Map<String, serde_json::Value> = fields.into_iter().collect();
            let extra = (!extra.is_empty()).then_some(extra);
            let record = registry.create(owner.as_str(), extra).await?;
            print_record(&record)?;
        }
        cli::TokenCommands::Remove { name, owner } => {
            let registry = registry_for(model, &name)?;
            let result = registry.remove(owner.as_str()).await?;
            println!("Removed {} token(s).", result.removed);
        }
        cli::TokenCommands::List { name, owner } => {
            let registry = registry_for(model, &name)?;
            let records = registry.find_by_owner(owner.as_str()).await?;
            if records.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<38} {:<26} {:<8}", "ID", "EXPIRES", "VALID");
                for r in records {
                    let expires = r
                        .expires_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".into());
                    println!("{:<38} {:<26} {:<8}", r.id, expires, r.valid);
                }
            }
        }
        cli::TokenCommands::Lookup {
            name,
            key,
            secret,
            token,
        } => {
            let registry = registry_for(model, &name)?;
            let record = match (key, secret, token) {
                (Some(key), Some(secret), _) => Some(
                    registry
                        .find_by_key_and_secret(&CredentialPair { key, secret })
                        .await?,
                ),
                (Some(key), None, _) => registry.find_by_key(&key).await?,
                (None, Some(secret), _) => registry.find_by_secret(&secret).await?,
                (None, None, Some(token)) => registry.find_by_token(&token).await?,
                (None, None, None) => anyhow::bail!("one of --key, --secret or --token is required"),
            };
            match record {
                Some(record) => print_record(&record)?,
                None => anyhow::bail!(tokenbind::TokenError::InvalidCredential),
            }
        }
    }
    Ok(())
}

async fn run_purge(store: Arc<dyn TokenStore>, watch: bool, interval_secs: u64) -> anyhow::Result<()> {
    if !watch || interval_secs == 0 {
        let removed = jobs::expiry::sweep(store.as_ref()).await?;
        println!("Purged {} expired token(s).", removed);
        return Ok(());
    }

    tracing::info!(interval_secs, "Starting expiry sweeper");
    let handle = jobs::expiry::spawn(store, Duration::from_secs(interval_secs));
    tokio::signal::ctrl_c().await?;
    handle.abort();
    tracing::info!("Expiry sweeper stopped");
    Ok(())
}

fn print_record(record: &TokenRecord) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
