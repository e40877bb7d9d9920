//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：一次非流式完成，输入消息列表、输出文本。
//! 流水线的各阶段只依赖这个 trait，把托管模型当作不透明的文本变换。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 模型调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    Api(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型名（用于日志）
    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
