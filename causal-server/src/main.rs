//! causal-server: serves append-only causal document graphs over HTTP and
//! WebSocket.
//!
//! ```text
//! causal-server --data ./data --bind 0.0.0.0:8080 \
//!     --restore 'aws s3 cp ...' --replicate 'aws s3 cp ...'
//! ```
//! Hooks are invoked as `<command> <data_dir> <filename>`.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use causal_collab::registry::REGISTRY_DIR;
use causal_collab::server::{ServerConfig, SyncServer};

/// Sync server for causal document graphs.
#[derive(Parser)]
#[command(name = "causal-server", about = "Sync server for causal document graphs")]
struct Cli {
    /// Directory holding the registry and every document store.
    #[arg(long, default_value = "./data", env = "CAUSAL_DATA_DIR")]
    data: PathBuf,

    /// Command run before a file is first opened.
    #[arg(long, env = "CAUSAL_RESTORE")]
    restore: Option<String>,

    /// Command run in the background after a file is first opened.
    #[arg(long, env = "CAUSAL_REPLICATE")]
    replicate: Option<String>,

    /// Address to bind the HTTP server.
    #[arg(long, default_value = "0.0.0.0:8080", env = "CAUSAL_BIND")]
    bind: String,

    /// Maximum replicate hooks running at once.
    #[arg(long, default_value_t = 4)]
    max_replicate_jobs: usize,

    /// Vertices buffered per stream before a slow client is dropped.
    #[arg(long, default_value_t = 1024)]
    subscriber_queue: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data)?;
    let data_dir = cli.data.canonicalize()?;

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind_addr: cli.bind,
        store: defaults.store.with_path(data_dir.join(REGISTRY_DIR)),
        data_dir,
        restore_command: cli.restore,
        replicate_command: cli.replicate,
        max_replicate_jobs: cli.max_replicate_jobs,
        subscriber_queue: cli.subscriber_queue,
    };

    // The registry gets the same hooks as any document, before it is opened
    let hooks = config.hooks();
    hooks.restore(REGISTRY_DIR).await?;
    hooks.replicate(REGISTRY_DIR);

    info!("Starting causal-server (data in {})", config.data_dir.display());
    SyncServer::with_hooks(config, hooks)?.run().await
}
