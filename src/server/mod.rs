//! Web API：会话管理与流水线运行
//!
//! 路由与前端约定一致：
//! - `GET /health`、`GET /list-apps`
//! - `/apps/:app/users/:user/sessions[/:id]`：创建 / 列表 / 查询 / 删除会话
//! - `POST /run`：返回本轮全部事件；`POST /run_sse`：逐条推送事件

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::runner::Runner;

/// 处理函数共享的状态
pub struct ServerState {
    pub runner: Runner,
    /// 关闭时结束仍在推送的 SSE 流
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(runner: Runner, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self { runner, shutdown })
    }
}

/// CORS：列表中含 `*` 时放行任意来源，否则只放行列出的来源
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

/// 创建完整路由
pub fn create_router(state: Arc<ServerState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/list-apps", get(handlers::list_apps))
        .route(
            "/apps/:app_name/users/:user_id/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/apps/:app_name/users/:user_id/sessions/:session_id",
            get(handlers::get_session)
                .post(handlers::create_session_with_id)
                .delete(handlers::delete_session),
        )
        .route("/run", post(handlers::run))
        .route("/run_sse", post(handlers::run_sse))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(allowed_origins)),
        )
        .with_state(state)
}

/// 监听端口：`PORT` 环境变量优先，其次配置
pub fn resolve_port(configured: u16) -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(configured)
}

/// 启动服务，直到 shutdown 被取消
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
