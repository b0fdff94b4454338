mod auth;
mod config;
mod server;

use clap::Parser;
use config::Config;
use tracing_subscriber::FmtSubscriber;

/// MySQL-compatible front end.
#[derive(Debug, Parser)]
#[command(name = "quarry-server", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.example.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::new();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::from_path(&args.config)?;
    server::run(config).await?;
    Ok(())
}
