// gymcache maintenance CLI.
// Inspects and invalidates the on-disk response cache used by the gym client.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gymcache::cache::{LocalCache, Lookup, paths};
use gymcache::config::CacheConfig;
use gymcache::error::Result;

#[derive(Parser, Debug)]
#[command(name = "gymcache", version, about = "Inspect the gym client's local response cache")]
struct Cli {
    /// JSON config file (defaults to the platform config dir)
    #[arg(long, env = "GYMCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache root directory, overriding config and environment
    #[arg(long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the payload stored under a key
    Get {
        key: String,
        /// Maximum age in milliseconds (defaults to the configured TTL)
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    /// Store a JSON payload under a key
    Set { key: String, json: String },
    /// Remove a single key
    Delete { key: String },
    /// Remove every key starting with a prefix, e.g. "clientes:*"
    Invalidate { pattern: String },
    /// Remove every entry
    Clear,
    /// List stored keys
    Keys {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Show entry count and size
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gymcache=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(paths::config_path);
    let mut config = CacheConfig::load_or_default(config_path.as_deref())?.with_env()?;
    if let Some(dir) = cli.dir {
        config.root = Some(dir);
    }

    let cache = LocalCache::from_config(&config)?;
    cache.open().await?;

    match cli.command {
        Command::Get { key, ttl_ms } => {
            let ttl = ttl_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| cache.default_ttl());
            match cache.lookup::<serde_json::Value>(&key, ttl).await {
                Lookup::Hit(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Lookup::Miss => println!("(miss)"),
                Lookup::Error(e) => return Err(e),
            }
        }
        Command::Set { key, json } => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            cache.set(&key, &value).await?;
        }
        Command::Delete { key } => cache.delete(&key).await?,
        Command::Invalidate { pattern } => {
            let removed = cache.invalidate_pattern(&pattern).await?;
            println!("removed {}", removed);
        }
        Command::Clear => {
            let removed = cache.clear().await?;
            println!("removed {}", removed);
        }
        Command::Keys { prefix } => {
            let keys = match prefix {
                Some(prefix) => cache.keys_with_prefix(&prefix).await?,
                None => cache.keys().await?,
            };
            for key in keys {
                println!("{}", key);
            }
        }
        Command::Stats => {
            let stats = cache.stats().await?;
            println!("entries: {}", stats.entry_count);
            println!("bytes:   {}", stats.bytes);
        }
    }

    cache.close().await;
    Ok(())
}

