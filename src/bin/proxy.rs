//! CodeBuddy 请求转发代理
//!
//! 把所有请求转发到 `proxy.upstream`（或环境变量 SERVER）指向的 API 服务。
//! 用法：`SERVER=http://backend:8000 codebuddy-proxy [config.toml]`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use codebuddy::{
    config::load_config,
    core::ShutdownManager,
    observability,
    proxy::{create_router, Forwarder},
    server::resolve_port,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let upstream = cfg
        .proxy
        .resolve_upstream()
        .context("No upstream configured: set proxy.upstream or the SERVER environment variable")?;

    let forwarder = Arc::new(Forwarder::new(upstream, cfg.proxy.timeout_secs));
    let router = create_router(Arc::clone(&forwarder));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let addr = SocketAddr::from(([0, 0, 0, 0], resolve_port(cfg.proxy.port)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Proxy listening on http://{} -> {}", addr, forwarder.upstream());

    let token = shutdown.token();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Proxy server failed")?;
    Ok(())
}
