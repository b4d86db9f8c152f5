// src/main.rs

//! Entry point for the RidgeDB node process.

use anyhow::Result;
use ridgedb::config::Config;
use ridgedb::server;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("RidgeDB version {VERSION}");
        return Ok(());
    }

    let Some(config_path) = args.get(1) else {
        eprintln!("usage: ridgedb <config-path>");
        std::process::exit(2);
    };

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let reload_handle = Arc::new(reload_handle);
    ridgedb::metrics::init();

    if let Err(e) = server::run(config, reload_handle).await {
        error!("server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
