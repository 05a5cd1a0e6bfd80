use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use rangefetch::{FsBlobStore, HttpResourceClient};
use tracing::info;

use vodbridge::config::{ServerConfig, SourcesManifest};
use vodbridge::error::Error;
use vodbridge::hls::{HlsSource, SourceRegistry};
use vodbridge::server::{AppState, router};
use vodbridge::logging;

#[derive(Debug, Parser)]
#[command(name = "vodbridge", about = "Local HLS delivery bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the local content server.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Listen address; overrides the config default.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// JSON manifest of sources to register.
    #[arg(long)]
    sources: PathBuf,

    /// Cache directory for fetched resource data.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Directory of static runtime assets.
    #[arg(long)]
    assets_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Error> {
    let mut config = ServerConfig::default();
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.cache_dir = args.cache_dir.or(config.cache_dir);
    config.assets_dir = args.assets_dir.or(config.assets_dir);

    let manifest_raw = std::fs::read_to_string(&args.sources)?;
    let manifest: SourcesManifest = serde_json::from_str(&manifest_raw)?;

    let client = Arc::new(HttpResourceClient::new()?);
    let store: Arc<FsBlobStore> = match &config.cache_dir {
        Some(dir) => Arc::new(FsBlobStore::new(dir)?),
        None => Arc::new(FsBlobStore::in_temp_dir()?),
    };

    let registry = SourceRegistry::new();
    for entry in &manifest.sources {
        let variants = entry
            .qualities
            .iter()
            .map(|quality| quality.variant())
            .collect();
        registry.register(HlsSource::new(
            entry.id.clone(),
            variants,
            client.clone(),
            store.clone(),
        ));
    }

    let state = AppState {
        registry,
        assets_dir: config.assets_dir.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(listen = %listener.local_addr()?, "content server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
