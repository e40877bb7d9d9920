//! CodeBuddy API 服务
//!
//! 入口：初始化日志、加载配置、装配流水线与会话存储，启动 Web API 直到收到关闭信号。
//! 用法：`codebuddy [config.toml]`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use codebuddy::{
    agent::build_flow_agent,
    config::load_config,
    core::ShutdownManager,
    observability,
    runner::Runner,
    server::{self, ServerState},
    session::create_session_store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let agent = Arc::new(build_flow_agent(&cfg));
    let sessions = create_session_store(cfg.server.session_db.as_deref()).await;
    let runner = Runner::new(cfg.app.name.clone(), agent, sessions);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let state = ServerState::new(runner, shutdown.token());
    let router = server::create_router(state, &cfg.server.allowed_origins);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, server::resolve_port(cfg.server.port))
        .parse()
        .context("Invalid listen address")?;
    server::serve(addr, router, shutdown.token())
        .await
        .context("API server failed")?;

    tracing::info!("API server stopped");
    Ok(())
}
