//! 工具：供流水线阶段调用的确定性能力（目前只有 GitHub raw 文件读取）
//!
//! 工具实现 Tool trait（name / description / parameters_schema / execute），
//! 参数 schema 会写进定位阶段的 Prompt，让模型按 schema 输出参数 JSON。

pub mod github;

use async_trait::async_trait;
use serde_json::Value;

pub use github::{FetchError, GithubLocation, GithubRawTool};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}
