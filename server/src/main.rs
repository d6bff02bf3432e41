use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use server::store::{FilePlayerStore, MemoryPlayerStore, PlayerStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Parses command-line arguments, opens the player store and serves until Ctrl+C
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Milliseconds between position broadcasts
        #[clap(long, default_value = "32")]
        broadcast_interval_ms: u64,
        /// Milliseconds between player saves
        #[clap(long, default_value = "1000")]
        save_interval_ms: u64,
        /// Seconds of silence before a session is dropped (0 disables)
        #[clap(long, default_value = "30")]
        idle_timeout_secs: u64,
        /// Player file; players are kept in memory only when omitted
        #[clap(short, long)]
        store: Option<PathBuf>,
        /// Log level used when RUST_LOG is not set
        #[clap(short, long, default_value = "info")]
        log_level: String,
    }

    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        broadcast_interval: Duration::from_millis(args.broadcast_interval_ms.max(1)),
        save_interval: Duration::from_millis(args.save_interval_ms.max(1)),
        idle_timeout: (args.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(args.idle_timeout_secs)),
        store_path: args.store,
    };

    let store: Arc<dyn PlayerStore> = match &config.store_path {
        Some(path) => {
            let store = FilePlayerStore::open(path)?;
            info!("Using player file {}", store.path().display());
            Arc::new(store)
        }
        None => {
            info!("Using in-memory player store");
            Arc::new(MemoryPlayerStore::new())
        }
    };

    let server = Server::bind(config, store).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        })
        .await?;

    Ok(())
}
