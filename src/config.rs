//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODEBUDDY__*` 覆盖（双下划线表示嵌套，如 `CODEBUDDY__SERVER__PORT=9000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub llm: LlmSection,
    pub github: GithubSection,
    pub proxy: ProxySection,
    pub relay: RelaySection,
}

/// [app] 段：应用名（即 API 路径中的 app）、送入模型的历史条数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 每次调用模型时携带的会话历史轮数（user + system 各算一条，实际保留 2 倍）
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            max_context_turns: default_max_context_turns(),
        }
    }
}

fn default_app_name() -> String {
    "git_agent".to_string()
}

fn default_max_context_turns() -> usize {
    10
}

/// [server] 段：监听地址、CORS 来源、会话库
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// SQLite 会话库路径；未设置时使用内存会话
    pub session_db: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
            allowed_origins: default_allowed_origins(),
            session_db: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost".into(),
        "http://localhost:3000".into(),
        "*".into(),
    ]
}

/// [llm] 段：后端选择、默认模型、各阶段模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub stages: LlmStagesSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            stages: LlmStagesSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "openai/gpt-4.1".to_string()
}

/// [llm.stages] 段：按阶段覆盖模型名，未设置时用 llm.model
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmStagesSection {
    pub classifier: Option<String>,
    pub locator: Option<String>,
    pub generator: Option<String>,
    pub refactor: Option<String>,
    pub documenter: Option<String>,
    pub tester: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    120
}

/// [github] 段：raw 文件地址前缀与超时
#[derive(Debug, Clone, Deserialize)]
pub struct GithubSection {
    #[serde(default = "default_raw_base_url")]
    pub raw_base_url: String,
    #[serde(default = "default_github_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            raw_base_url: default_raw_base_url(),
            timeout_secs: default_github_timeout_secs(),
        }
    }
}

fn default_raw_base_url() -> String {
    crate::tools::github::GITHUB_RAW_BASE_URL.to_string()
}

fn default_github_timeout_secs() -> u64 {
    30
}

/// [proxy] 段：转发目标与监听端口
#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    /// 转发目标（如 https://backend.example.com）；未设置时读取环境变量 SERVER
    pub upstream: Option<String>,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            upstream: None,
            port: default_proxy_port(),
            timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_proxy_timeout_secs() -> u64 {
    300
}

impl ProxySection {
    /// 配置优先，其次环境变量 SERVER
    pub fn resolve_upstream(&self) -> Option<String> {
        self.upstream
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| std::env::var("SERVER").ok())
            .filter(|s| !s.trim().is_empty())
    }
}

/// [relay] 段：Webhook → SSE 中继
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// 待推送消息的缓冲容量
    #[serde(default = "default_relay_buffer")]
    pub buffer: usize,
    /// 缓冲满时 Webhook 等待入队的时长（秒）
    #[serde(default = "default_relay_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            buffer: default_relay_buffer(),
            send_timeout_secs: default_relay_send_timeout_secs(),
        }
    }
}

fn default_relay_port() -> u16 {
    8000
}

fn default_relay_buffer() -> usize {
    10
}

fn default_relay_send_timeout_secs() -> u64 {
    5
}

/// 从 config 目录加载配置，环境变量 CODEBUDDY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODEBUDDY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CODEBUDDY")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("server.allowed_origins"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.name, "git_agent");
        assert_eq!(cfg.server.port, 8000);
        assert!(cfg.server.allowed_origins.iter().any(|o| o == "*"));
        assert_eq!(cfg.relay.buffer, 10);
        assert_eq!(cfg.relay.send_timeout_secs, 5);
        assert_eq!(cfg.github.raw_base_url, "https://raw.githubusercontent.com");
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[app]\nname = \"demo\"\n\n[llm.stages]\nrefactor = \"anthropic/claude-sonnet-4-20250514\"\n\n[relay]\nbuffer = 3"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.app.name, "demo");
        assert_eq!(
            cfg.llm.stages.refactor.as_deref(),
            Some("anthropic/claude-sonnet-4-20250514")
        );
        assert_eq!(cfg.relay.buffer, 3);
        assert_eq!(cfg.relay.send_timeout_secs, 5);
    }

    #[test]
    fn test_proxy_upstream_prefers_config() {
        let section = ProxySection {
            upstream: Some("http://backend:8000".to_string()),
            ..ProxySection::default()
        };
        assert_eq!(section.resolve_upstream().as_deref(), Some("http://backend:8000"));
    }
}
