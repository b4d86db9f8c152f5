// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, reload};

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>,
) -> Result<()> {
    let _ = &log_reload_handle;

    // 1. Build NodeState, bind the DATA/INGRESS listeners.
    let context = initialization::setup(config).await?;

    // 2. Spawn gossip, raft, and metrics background tasks.
    let background_tasks = spawner::spawn_all(&context).await?;

    // 3. Run the main connection acceptance loop until shutdown.
    connection_loop::run(context, background_tasks).await;

    Ok(())
}
