//! 事件：流水线每一步的输出
//!
//! JSON 结构与前端约定一致（camelCase）：前端在 `/run` 返回的事件列表中
//! 查找 `actions.stateDelta.final_output` 作为本轮回复。

use serde::{Deserialize, Serialize};

use crate::pipeline::state::StateDelta;

/// 消息片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// 消息内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new("model", text)
    }

    /// 拼接所有文本片段
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 事件附带的动作（目前只有状态增量）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    #[serde(default)]
    pub state_delta: StateDelta,
}

/// 流水线事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub actions: EventActions,
    /// Unix 时间（秒，带小数）
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Event {
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            content: None,
            actions: EventActions::default(),
            timestamp: now_secs(),
            error_message: None,
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.actions.state_delta = delta;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// 内容文本（无内容时为空串）
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }
}

/// 新的调用 ID（同一次 /run 产生的事件共享）
pub fn new_invocation_id() -> String {
    format!("e-{}", uuid::Uuid::new_v4())
}

pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
