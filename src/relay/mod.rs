//! Webhook → SSE 中继
//!
//! `POST /webhook` 把 `{"message": ...}` 放进有界缓冲；`GET /sse` 的订阅者从同一缓冲取消息，
//! 每条消息只投递给一个订阅者。缓冲持续满载超过 send_timeout 时 Webhook 返回 503。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub const RECEIVED_MESSAGE: &str = "Message received successfully";
pub const BUSY_MESSAGE: &str = "Service busy, try again later";

/// Webhook 请求体
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub message: String,
}

/// 中继共享状态
#[derive(Clone)]
pub struct RelayState {
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(buffer: usize, send_timeout: Duration, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            send_timeout,
            shutdown,
        }
    }
}

/// POST /webhook
async fn webhook(State(state): State<RelayState>, body: Bytes) -> Response {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let message = payload.message;
    match state.tx.send_timeout(message.clone(), state.send_timeout).await {
        Ok(()) => {
            tracing::info!("Webhook received and message queued: {}", message);
            Json(serde_json::json!({ "message": RECEIVED_MESSAGE })).into_response()
        }
        Err(e) => {
            tracing::warn!("Webhook message '{}' could not be queued: {}", message, e);
            (StatusCode::SERVICE_UNAVAILABLE, BUSY_MESSAGE).into_response()
        }
    }
}

/// GET /sse
async fn sse(State(state): State<RelayState>) -> impl IntoResponse {
    tracing::info!("SSE subscriber connected");
    let events = stream::unfold(state, |state| async move {
        let message = {
            let mut rx = tokio::select! {
                rx = state.rx.lock() => rx,
                _ = state.shutdown.cancelled() => return None,
            };
            tokio::select! {
                message = rx.recv() => message?,
                _ = state.shutdown.cancelled() => return None,
            }
        };
        tracing::info!("SSE sent: {}", message);
        Some((Ok::<_, Infallible>(Event::default().data(message)), state))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/sse", get(sse))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(buffer: usize, timeout_ms: u64) -> RelayState {
        RelayState::new(buffer, Duration::from_millis(timeout_ms), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_webhook_queues_message() {
        let state = state(10, 100);
        let resp = webhook(State(state.clone()), Bytes::from_static(br#"{"message": "build done"}"#)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let queued = state.rx.lock().await.recv().await;
        assert_eq!(queued.as_deref(), Some("build done"));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_json() {
        let resp = webhook(State(state(10, 100)), Bytes::from_static(b"not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_full_buffer_returns_busy() {
        let state = state(1, 50);
        let first = webhook(State(state.clone()), Bytes::from_static(br#"{"message": "a"}"#)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = webhook(State(state), Bytes::from_static(br#"{"message": "b"}"#)).await;
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
