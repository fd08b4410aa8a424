mod adapters;
mod config;
mod context;
mod core;
mod dialog;
mod error;
mod intent;
mod notify;
mod orchestrator;
mod planner;
mod prompts;
mod render;
mod resultset;
mod server;
mod state;
mod traits;
mod types;
mod userlock;
mod utils;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::error::CoreError;

fn main() -> ExitCode {
    // .env is optional; an explicit STRIVE_ENV_FILE wins over discovery.
    if let Ok(path) = std::env::var("STRIVE_ENV_FILE") {
        if !path.trim().is_empty() {
            if let Err(e) = dotenvy::from_path(&path) {
                eprintln!("Warning: failed to load STRIVE_ENV_FILE '{}': {}", path, e);
            }
        }
    } else {
        let _ = dotenvy::dotenv();
    }

    let config_path = std::env::var("STRIVE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {}", e);
            return ExitCode::from(e.exit_code().unwrap_or(1) as u8);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Fatal: failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(crate::core::run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ CoreError::StartupStoreUnreachable(_)) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code().unwrap_or(1) as u8)
        }
    }
}
