#![cfg(not(tarpaulin_include))]

use clap::Parser;
use log::info;
use std::path::PathBuf;

use seguiment::app;
use seguiment::config::{Config, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "website", version, about = "Daily progress form for installation crews")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "SEGUIMENT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,
}

/// Main entry point for the web application
///
/// Loads the configuration, sets up logging (`RUST_LOG`, `info` by default)
/// and serves the form until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!("Starting seguiment v{}", env!("CARGO_PKG_VERSION"));
    app::run(config).await
}
