//! GitHub raw 文件读取
//!
//! 文件地址按固定模板拼接：`{raw_base}/{owner}/{repo}/{branch}/{filepath}`。
//! 用户输入里的位置信息可能是 blob 链接、raw 链接、`owner/repo/branch/path` 简写，
//! 或 `owner: x, repo: y ...` 这样的字段描述；能直接解析的不再调用模型。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::Tool;

pub const GITHUB_RAW_BASE_URL: &str = "https://raw.githubusercontent.com";

static BLOB_URL_RE: OnceLock<Regex> = OnceLock::new();
static RAW_URL_RE: OnceLock<Regex> = OnceLock::new();
static FIELD_RE: OnceLock<Regex> = OnceLock::new();
static SHORTHAND_RE: OnceLock<Regex> = OnceLock::new();

/// 仓库中单个文件的位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubLocation {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub filepath: String,
}

impl GithubLocation {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        filepath: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            filepath: filepath.into(),
        }
    }

    /// raw 文件地址
    pub fn raw_url(&self, raw_base_url: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            raw_base_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.branch,
            self.filepath.trim_start_matches('/')
        )
    }

    /// 四个字段都非空
    pub fn is_complete(&self) -> bool {
        [&self.owner, &self.repo, &self.branch, &self.filepath]
            .iter()
            .all(|s| !s.trim().is_empty())
    }

    /// 从自由文本中解析文件位置；依次尝试 blob 链接、raw 链接、字段描述、简写
    pub fn parse(input: &str) -> Option<Self> {
        let blob = BLOB_URL_RE.get_or_init(|| {
            Regex::new(
                r#"https?://(?:www\.)?github\.com/([\w.-]+)/([\w.-]+)/(?:blob|raw)/([\w.-]+)/([^\s?#)>\]'"`]+)"#,
            )
            .unwrap()
        });
        let raw = RAW_URL_RE.get_or_init(|| {
            Regex::new(
                r#"https?://raw\.githubusercontent\.com/([\w.-]+)/([\w.-]+)/([\w.-]+)/([^\s?#)>\]'"`]+)"#,
            )
            .unwrap()
        });

        for re in [blob, raw] {
            if let Some(caps) = re.captures(input) {
                return Some(Self::new(&caps[1], &caps[2], &caps[3], clean_path(&caps[4])))
                    .filter(Self::is_complete);
            }
        }

        Self::parse_fields(input).or_else(|| Self::parse_shorthand(input))
    }

    fn parse_fields(input: &str) -> Option<Self> {
        let re = FIELD_RE.get_or_init(|| {
            Regex::new(
                r#"(?i)\b(owner|repository|repo|branch|file\s*path|filepath|path|file)\s*[:=]\s*["'`]?([^\s,;"'`]+)"#,
            )
            .unwrap()
        });

        let mut location = Self::new("", "", "", "");
        for caps in re.captures_iter(input) {
            let key = caps[1].to_lowercase().replace(char::is_whitespace, "");
            let value = caps[2].to_string();
            let slot = match key.as_str() {
                "owner" => &mut location.owner,
                "repo" | "repository" => &mut location.repo,
                "branch" => &mut location.branch,
                _ => &mut location.filepath,
            };
            if slot.is_empty() {
                *slot = value;
            }
        }
        location.filepath = clean_path(&location.filepath);
        Some(location).filter(Self::is_complete)
    }

    /// 简写必须占满整条消息；夹在句子里的路径交给定位阶段判断
    fn parse_shorthand(input: &str) -> Option<Self> {
        let re = SHORTHAND_RE.get_or_init(|| {
            Regex::new(r#"^["'`]?([\w.-]+)/([\w.-]+)/([\w.-]+)/([^\s"'`]+)["'`]?$"#).unwrap()
        });
        let caps = re.captures(input.trim())?;
        Some(Self::new(&caps[1], &caps[2], &caps[3], clean_path(&caps[4]))).filter(Self::is_complete)
    }
}

/// 去掉句末标点与首部斜杠
fn clean_path(path: &str) -> String {
    path.trim_start_matches('/')
        .trim_end_matches(['.', ',', ';', ':'])
        .to_string()
}

/// raw 文件读取错误
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// GitHub raw 文件读取工具
pub struct GithubRawTool {
    client: Client,
    raw_base_url: String,
}

impl GithubRawTool {
    pub fn new(raw_base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("codebuddy/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            raw_base_url: raw_base_url.into(),
        }
    }

    pub async fn fetch(&self, location: &GithubLocation) -> Result<String, FetchError> {
        let url = location.raw_url(&self.raw_base_url);
        tracing::info!("Fetching GitHub file: {}", url);

        let request_err = |source: reqwest::Error| FetchError::Request {
            url: url.clone(),
            source,
        };
        let resp = self.client.get(&url).send().await.map_err(request_err)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status: resp.status().as_u16(),
            });
        }
        resp.text().await.map_err(request_err)
    }
}

impl Default for GithubRawTool {
    fn default() -> Self {
        Self::new(GITHUB_RAW_BASE_URL, 30)
    }
}

#[async_trait]
impl Tool for GithubRawTool {
    fn name(&self) -> &str {
        "read_file_from_github_raw"
    }

    fn description(&self) -> &str {
        "Reads a file from a public GitHub repository through its raw content URL."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "owner": { "type": "string", "description": "User or organization that owns the repository" },
                "repo": { "type": "string", "description": "Repository name" },
                "branch": { "type": "string", "description": "Branch name, e.g. main" },
                "filepath": { "type": "string", "description": "Path of the file inside the repository" }
            },
            "required": ["owner", "repo", "branch", "filepath"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let location: GithubLocation =
            serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))?;
        self.fetch(&location).await.map_err(|e| e.to_string())
    }
}
