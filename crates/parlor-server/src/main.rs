//! `parlor` binary: authenticated chat proxy for OpenAI and Anthropic models.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use parlor_server::config::{ServerArgs, ServerConfig};

#[derive(Parser)]
#[command(name = "parlor", version, about = "Authenticated chat proxy for OpenAI and Anthropic models")]
struct Cli {
    #[command(flatten)]
    server: ServerArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be applied before clap reads env-backed arguments.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dotenv {
        Ok(path) => tracing::info!("loaded environment from {}", path.display()),
        Err(e) if e.not_found() => tracing::info!("no .env file found, using process environment"),
        Err(e) => tracing::warn!("failed to load .env file: {e}"),
    }

    let config = ServerConfig::from_args(cli.server)?;
    parlor_server::serve(config).await
}
