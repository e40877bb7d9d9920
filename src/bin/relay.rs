//! CodeBuddy Webhook → SSE 中继
//!
//! 用法：`codebuddy-relay [config.toml]`，默认监听 8000（PORT 环境变量可覆盖）

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use codebuddy::{
    config::load_config,
    core::ShutdownManager,
    observability,
    relay::{create_router, RelayState},
    server::resolve_port,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let state = RelayState::new(
        cfg.relay.buffer,
        Duration::from_secs(cfg.relay.send_timeout_secs),
        shutdown.token(),
    );
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], resolve_port(cfg.relay.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Relay listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shutdown)))
        .await
        .context("Relay server failed")?;
    Ok(())
}

async fn shutdown_signal(shutdown: Arc<ShutdownManager>) {
    shutdown.wait_for_shutdown().await;
    tracing::info!("Relay shutting down");
}
