//! 错误类型
//!
//! PipelineError：流水线阶段失败（模型调用、模板渲染）；SessionError：会话存储读写失败。
//! HTTP 层把二者映射为状态码，见 server::handlers。

use thiserror::Error;

use crate::llm::LlmError;

/// 流水线运行过程中的错误；任一阶段失败即终止本次运行
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage '{stage}' failed: {source}")]
    Llm {
        stage: String,
        #[source]
        source: LlmError,
    },

    /// 指令模板引用了会话状态中不存在的键
    #[error("stage '{stage}' references missing state key '{key}'")]
    MissingStateKey { stage: String, key: String },
}

impl PipelineError {
    pub fn llm(stage: &str, source: LlmError) -> Self {
        Self::Llm {
            stage: stage.to_string(),
            source,
        }
    }
}

/// 会话存储错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
