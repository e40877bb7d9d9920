//! 请求转发代理
//!
//! 把收到的请求（方法、路径与查询串、请求头、请求体）原样转发到 `{upstream}{path}`，
//! 再把上游的状态码、响应头与响应体返回。任何失败都返回 500 与 `{"error": "..."}`。
//!
//! 两个入口：
//! - axum fallback 服务（codebuddy-proxy 二进制）
//! - 函数 URL 事件（`requestContext.http.{method,path}` + headers + body）

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;

/// 请求体上限
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// 不转发的逐跳头与 host
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// 转发错误
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    #[error("invalid request body: {0}")]
    Body(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// 待转发的请求
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// 路径（可含查询串），以 `/` 开头
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// 上游响应
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// 去掉逐跳头
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// 转发器
pub struct Forwarder {
    client: reqwest::Client,
    upstream: String,
}

impl Forwarder {
    pub fn new(upstream: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            upstream: upstream.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn target_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.upstream, path)
        } else {
            format!("{}/{}", self.upstream, path)
        }
    }

    pub async fn forward(&self, req: ForwardRequest) -> Result<ForwardResponse, ProxyError> {
        let url = self.target_url(&req.path);
        tracing::debug!("Forwarding {} {}", req.method, url);

        let resp = self
            .client
            .request(req.method, &url)
            .headers(strip_hop_by_hop(&req.headers))
            .body(req.body)
            .send()
            .await?;

        let status = resp.status();
        let headers = strip_hop_by_hop(resp.headers());
        let body = resp.bytes().await?;
        Ok(ForwardResponse { status, headers, body })
    }
}

/// 失败响应体
pub fn error_body(err: &ProxyError) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

/// 函数 URL 事件中的 http 信息
#[derive(Debug, Clone, Deserialize)]
pub struct LambdaHttpContext {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LambdaRequestContext {
    pub http: LambdaHttpContext,
}

/// 函数 URL 事件
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaHttpEvent {
    pub request_context: LambdaRequestContext,
    #[serde(default)]
    pub raw_query_string: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// 函数 URL 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl LambdaHttpEvent {
    fn into_forward_request(self) -> Result<ForwardRequest, ProxyError> {
        let method = Method::from_bytes(self.request_context.http.method.as_bytes())
            .map_err(|_| ProxyError::InvalidMethod(self.request_context.http.method.clone()))?;

        let mut path = self.request_context.http.path;
        if let Some(query) = self.raw_query_string.filter(|q| !q.is_empty()) {
            path = format!("{}?{}", path, query);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!("Dropping invalid header {}", name),
            }
        }

        Ok(ForwardRequest {
            method,
            path,
            headers,
            body: Bytes::from(self.body.unwrap_or_default()),
        })
    }
}

/// 处理函数 URL 事件
pub async fn handle_lambda_event(forwarder: &Forwarder, event: LambdaHttpEvent) -> LambdaResponse {
    let result = match event.into_forward_request() {
        Ok(req) => forwarder.forward(req).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(resp) => LambdaResponse {
            status_code: resp.status.as_u16(),
            headers: resp
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: String::from_utf8_lossy(&resp.body).into_owned(),
        },
        Err(e) => {
            tracing::error!("Forwarding failed: {}", e);
            LambdaResponse {
                status_code: 500,
                headers: HashMap::new(),
                body: error_body(&e),
            }
        }
    }
}

fn error_response(err: &ProxyError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        error_body(err),
    )
        .into_response()
}

/// fallback：转发所有请求
async fn proxy_handler(State(forwarder): State<Arc<Forwarder>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return error_response(&ProxyError::Body(e.to_string())),
    };
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let forward = ForwardRequest {
        method: parts.method,
        path,
        headers: parts.headers,
        body,
    };
    match forwarder.forward(forward).await {
        Ok(resp) => {
            let mut response = Response::new(Body::from(resp.body));
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response
        }
        Err(e) => {
            tracing::error!("Forwarding failed: {}", e);
            error_response(&e)
        }
    }
}

/// 代理路由：所有路径都交给 fallback 转发
pub fn create_router(forwarder: Arc<Forwarder>) -> Router {
    Router::new()
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(forwarder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("example.com"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer x"));

        let stripped = strip_hop_by_hop(&headers);
        assert_eq!(stripped.len(), 2);
        assert!(stripped.get("host").is_none());
        assert_eq!(stripped.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_target_url_joins_path() {
        let fwd = Forwarder::new("http://backend:8000/", 5);
        assert_eq!(fwd.target_url("/run?x=1"), "http://backend:8000/run?x=1");
        assert_eq!(fwd.target_url("health"), "http://backend:8000/health");
    }

    #[test]
    fn test_lambda_event_parsing() {
        let event: LambdaHttpEvent = serde_json::from_value(serde_json::json!({
            "requestContext": { "http": { "method": "POST", "path": "/run" } },
            "rawQueryString": "debug=1",
            "headers": { "content-type": "application/json", "bad header": "x" },
            "body": "{\"a\":1}"
        }))
        .unwrap();
        let req = event.into_forward_request().unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/run?debug=1");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.body, Bytes::from_static(b"{\"a\":1}"));
    }

    #[test]
    fn test_function_url_payload_round_trip() {
        // 函数 URL 2.0 负载里的其余字段忽略
        let event: LambdaHttpEvent = serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "routeKey": "$default",
            "rawPath": "/list-apps",
            "rawQueryString": "",
            "headers": { "accept": "application/json" },
            "requestContext": {
                "accountId": "anonymous",
                "domainName": "abc.lambda-url.us-east-1.on.aws",
                "http": { "method": "GET", "path": "/list-apps", "protocol": "HTTP/1.1", "sourceIp": "1.2.3.4" },
                "requestId": "r-1"
            },
            "isBase64Encoded": false
        }))
        .unwrap();
        let req = event.into_forward_request().unwrap();
        assert_eq!(req.path, "/list-apps");

        let resp = LambdaResponse {
            status_code: 200,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: "[]".into(),
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["headers"]["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_lambda_unreachable_upstream_returns_500() {
        // 端口 1 上没有服务
        let fwd = Forwarder::new("http://127.0.0.1:1", 2);
        let event: LambdaHttpEvent = serde_json::from_value(serde_json::json!({
            "requestContext": { "http": { "method": "GET", "path": "/health" } }
        }))
        .unwrap();

        let resp = handle_lambda_event(&fwd, event).await;
        assert_eq!(resp.status_code, 500);
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("upstream request failed"));
    }
}
