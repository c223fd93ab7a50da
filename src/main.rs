use std::sync::Arc;

use nanoindex::config::Config;
use nanoindex::search::SearchEngine;
use tracing::{error, info};

mod cli;
mod server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    info!("starting nanoindex v{}", env!("CARGO_PKG_VERSION"));

    let command = cli::parse_command();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(2);
        }
    };

    let engine = match SearchEngine::new(&config) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            error!(%err, "could not open store at {}", config.data_dir);
            std::process::exit(3);
        }
    };

    let result = match command {
        cli::Command::Serve => server::run(config, engine).await,
        cli::Command::Stats => cli::run_stats(&engine, &config),
    };
    if let Err(err) = result {
        error!(%err, "fatal error");
        std::process::exit(1);
    }
}
