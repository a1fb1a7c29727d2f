use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use federation::api::{AppState, router};
use federation::config::Config;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Federation gateway for multi-cluster GPU scheduling")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    let address = format!("{}:{}", config.listener.host, config.listener.port);
    tracing::info!(
        address,
        clusters = config.clusters.len(),
        "starting gateway"
    );

    let state = AppState::new(config)?;
    let app = router(state);
    let listener = TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
