//! CodeBuddy 函数 URL 转发入口
//!
//! 作为 Lambda 函数部署，把函数 URL 事件转发到 `proxy.upstream`（或环境变量 SERVER）。
//! 构建：`cargo build --release --features lambda --bin codebuddy-lambda`

use std::sync::Arc;

use anyhow::Context;
use codebuddy::{
    config::load_config,
    observability,
    proxy::{handle_lambda_event, Forwarder, LambdaHttpEvent, LambdaResponse},
};
use lambda_runtime::{service_fn, LambdaEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let upstream = cfg
        .proxy
        .resolve_upstream()
        .context("No upstream configured: set proxy.upstream or the SERVER environment variable")?;
    let forwarder = Arc::new(Forwarder::new(upstream, cfg.proxy.timeout_secs));
    tracing::info!("Lambda forwarder ready -> {}", forwarder.upstream());

    lambda_runtime::run(service_fn(move |event: LambdaEvent<LambdaHttpEvent>| {
        let forwarder = Arc::clone(&forwarder);
        async move {
            let response: LambdaResponse = handle_lambda_event(&forwarder, event.payload).await;
            Ok::<_, lambda_runtime::Error>(response)
        }
    }))
    .await
    .map_err(|e| anyhow::anyhow!(e))
    .context("Lambda runtime failed")
}
