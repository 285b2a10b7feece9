use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use card_scanner::config::Config;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();
    let config = Config::from_env()?;

    info!(database = %config.database_url, "Starting card scanner");

    if let Err(e) = cli::run(args, config).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
