//! API 处理函数
//!
//! 错误统一返回 `(StatusCode, String)`：会话不存在 404，会话已存在 409，请求体不合法 400。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::Value;

use super::ServerState;
use crate::core::SessionError;
use crate::pipeline::event::{Content, Event};
use crate::pipeline::state::SessionState;
use crate::session::{Session, SessionKey};

type ApiError = (StatusCode, String);

/// `/run` 与 `/run_sse` 的请求体；前端附带的 `streaming` 字段忽略，由路由决定是否逐条推送
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: Content,
}

fn session_error(e: SessionError) -> ApiError {
    match e {
        SessionError::NotFound(id) => (StatusCode::NOT_FOUND, format!("Session not found: {}", id)),
        SessionError::AlreadyExists(id) => (StatusCode::CONFLICT, format!("Session already exists: {}", id)),
        other => {
            tracing::error!("Session store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn ensure_app(state: &ServerState, app_name: &str) -> Result<(), ApiError> {
    if app_name == state.runner.app_name() {
        Ok(())
    } else {
        Err((StatusCode::NOT_FOUND, format!("App not found: {}", app_name)))
    }
}

/// 可选的初始状态：空请求体 / null 视为空状态，其它必须是 JSON 对象
fn parse_initial_state(body: &Bytes) -> Result<SessionState, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SessionState::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => Ok(SessionState::new()),
        Ok(Value::Object(map)) => Ok(SessionState::from_map(map)),
        Ok(_) => Err((StatusCode::BAD_REQUEST, "state must be a JSON object".to_string())),
        Err(e) => Err((StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e))),
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /list-apps
pub async fn list_apps(State(state): State<Arc<ServerState>>) -> Json<Vec<String>> {
    Json(vec![state.runner.app_name().to_string()])
}

/// POST /apps/:app/users/:user/sessions：生成会话 ID
pub async fn create_session(
    State(state): State<Arc<ServerState>>,
    Path((app_name, user_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Session>, ApiError> {
    create(&state, &app_name, &user_id, None, &body).await
}

/// POST /apps/:app/users/:user/sessions/:id：指定会话 ID
pub async fn create_session_with_id(
    State(state): State<Arc<ServerState>>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Session>, ApiError> {
    create(&state, &app_name, &user_id, Some(session_id), &body).await
}

async fn create(
    state: &ServerState,
    app_name: &str,
    user_id: &str,
    session_id: Option<String>,
    body: &Bytes,
) -> Result<Json<Session>, ApiError> {
    ensure_app(state, app_name)?;
    let initial = parse_initial_state(body)?;
    let session = state
        .runner
        .sessions()
        .create_session(app_name, user_id, session_id, initial)
        .await
        .map_err(session_error)?;
    tracing::info!("Created session {} for user {}", session.id, user_id);
    Ok(Json(session))
}

/// GET /apps/:app/users/:user/sessions
pub async fn list_sessions(
    State(state): State<Arc<ServerState>>,
    Path((app_name, user_id)): Path<(String, String)>,
) -> Result<Json<Vec<Session>>, ApiError> {
    ensure_app(&state, &app_name)?;
    let sessions = state
        .runner
        .sessions()
        .list_sessions(&app_name, &user_id)
        .await
        .map_err(session_error)?;
    Ok(Json(sessions))
}

/// GET /apps/:app/users/:user/sessions/:id
pub async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
) -> Result<Json<Session>, ApiError> {
    ensure_app(&state, &app_name)?;
    let key = SessionKey::new(&app_name, &user_id, &session_id);
    state
        .runner
        .sessions()
        .get_session(&key)
        .await
        .map_err(session_error)?
        .map(Json)
        .ok_or_else(|| session_error(SessionError::NotFound(session_id)))
}

/// DELETE /apps/:app/users/:user/sessions/:id
pub async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    ensure_app(&state, &app_name)?;
    let key = SessionKey::new(&app_name, &user_id, &session_id);
    state
        .runner
        .sessions()
        .delete_session(&key)
        .await
        .map_err(session_error)?;
    tracing::info!("Deleted session {}", session_id);
    Ok(StatusCode::OK)
}

fn validate_run(state: &ServerState, req: &RunRequest) -> Result<(), ApiError> {
    ensure_app(state, &req.app_name)?;
    if req.new_message.text().trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "newMessage must contain text".to_string()));
    }
    Ok(())
}

/// POST /run：运行流水线并返回全部事件
pub async fn run(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RunRequest>,
) -> Result<Json<Vec<Event>>, ApiError> {
    validate_run(&state, &req)?;
    let events = state
        .runner
        .run(&req.user_id, &req.session_id, req.new_message)
        .await
        .map_err(session_error)?;
    Ok(Json(events))
}

/// POST /run_sse：以 SSE 推送事件（每条 data 为一个事件 JSON）
pub async fn run_sse(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    validate_run(&state, &req)?;
    let rx = state
        .runner
        .run_stream(&req.user_id, &req.session_id, req.new_message)
        .await
        .map_err(session_error)?;

    let shutdown = state.shutdown.clone();
    let event_stream = stream::unfold((rx, shutdown), |(mut rx, shutdown)| async move {
        let event = tokio::select! {
            event = rx.recv() => event?,
            _ = shutdown.cancelled() => return None,
        };
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            serde_json::json!({ "errorMessage": format!("event serialization failed: {}", e) }).to_string()
        });
        Some((Ok(SseEvent::default().data(data)), (rx, shutdown)))
    });

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_initial_state() {
        assert!(parse_initial_state(&Bytes::new()).unwrap().as_map().is_empty());
        assert!(parse_initial_state(&Bytes::from_static(b"null")).unwrap().as_map().is_empty());

        let state = parse_initial_state(&Bytes::from_static(br#"{"theme": "dark"}"#)).unwrap();
        assert_eq!(state.get_str("theme"), Some("dark"));

        let err = parse_initial_state(&Bytes::from_static(b"[1, 2]")).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        let err = parse_initial_state(&Bytes::from_static(b"{oops")).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_run_request_accepts_frontend_body() {
        let req: RunRequest = serde_json::from_value(serde_json::json!({
            "appName": "git_agent",
            "userId": "u1",
            "sessionId": "s1",
            "newMessage": { "role": "user", "parts": [{ "text": "x = 1" }] },
            "streaming": false
        }))
        .unwrap();
        assert_eq!(req.new_message.text(), "x = 1");
    }
}
