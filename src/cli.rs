use clap::{Parser, Subcommand};

/// Owner-bound credential tokens
#[derive(Parser)]
#[command(name = "tokenbind", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "TOKENBIND_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations
    Migrate,

    /// Manage tokens of a configured token type
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Hash a value with the cached salt for a cost factor
    Hash {
        #[arg(long)]
        input: String,
        #[arg(long)]
        cost: Option<u32>,
    },

    /// Delete expired tokens
    Purge {
        /// Keep sweeping on TOKENBIND_SWEEP_INTERVAL_SECS until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for an owner
    Create {
        /// Token type name as declared in the token types file
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        /// Extension field, `name=value` (value parsed as JSON when possible)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, serde_json::Value)>,
    },
    /// Remove all tokens of a type held by an owner
    Remove {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// List an owner's tokens
    List {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// Find a token by key, secret, key+secret or single token
    Lookup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        secret: Option<String>,
        #[arg(long, conflicts_with_all = ["key", "secret"])]
        token: Option<String>,
    },
}

fn parse_field(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("field name missing in '{}'", raw));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
