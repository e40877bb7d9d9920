//! CodeBuddy - 代码加工流水线服务
//!
//! 模块划分：
//! - **agent**: 按配置装配流水线（每个阶段一个模型客户端）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 发给模型的对话窗口
//! - **pipeline**: 分类 → 取源代码 → 重构 → 文档 → 单元测试
//! - **runner**: 运行一轮流水线并持久化事件
//! - **session**: 会话存储（内存 / SQLite）
//! - **server**: Web API
//! - **proxy**: 请求转发代理
//! - **relay**: Webhook → SSE 中继
//! - **tools**: GitHub raw 文件读取

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod proxy;
pub mod relay;
pub mod runner;
pub mod server;
pub mod session;
pub mod tools;
