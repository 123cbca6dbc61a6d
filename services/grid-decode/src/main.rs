//! Decode NetCDF and GRIB2 files from the command line.
//!
//! Files are either decoded directly or ingested into the blob cache first
//! and decoded by key. Results are printed as JSON on stdout; logs go to
//! stderr. With `--cache-dir` (or `BLOB_STORE=local|s3`) decode results
//! persist across runs and repeated requests are answered from the cache.

mod commands;
mod store;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grid-decode")]
#[command(about = "Chunked NetCDF/GRIB2 decoder with result caching")]
struct Args {
    /// Directory of a persistent local cache (default: BLOB_STORE settings)
    #[arg(long, env = "GRID_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a file, or a cache entry with --reference
    Decode(commands::DecodeArgs),

    /// Store a file in the blob cache and print its key
    Ingest(commands::IngestArgs),

    /// List cached entries
    Keys,

    /// Delete a cached entry
    Delete {
        key: String,
    },

    /// Remove every cached entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cache = store::open_cache(args.cache_dir.as_deref())?;
    info!(backend = %cache.backend_name(), "Opened blob cache");

    match args.command {
        Command::Decode(decode) => commands::decode(cache, decode).await,
        Command::Ingest(ingest) => commands::ingest(&cache, ingest).await,
        Command::Keys => {
            for key in cache.keys().await? {
                println!("{}", key);
            }
            Ok(())
        }
        Command::Delete { key } => {
            let existed = cache.delete(&key).await?;
            println!("{}", serde_json::json!({ "key": key, "deleted": existed }));
            Ok(())
        }
        Command::Clear => {
            cache.clear().await?;
            Ok(())
        }
    }
}
