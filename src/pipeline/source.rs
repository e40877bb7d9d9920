//! 源代码获取
//!
//! - python_code：用户输入即源代码（若包含代码块则取代码块内容）
//! - github_details：先确定性解析文件位置，解析不出再让定位阶段按工具 schema 输出参数 JSON，
//!   最后调用 GitHub raw 读取工具
//!
//! 位置无法确定或文件读取失败时返回 Rejected，由编排器提前结束本轮。

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::core::PipelineError;
use crate::pipeline::stage::LlmStage;
use crate::pipeline::state::SessionState;
use crate::tools::{GithubLocation, Tool};

static CODE_BLOCK_RE: OnceLock<Regex> = OnceLock::new();
static JSON_OBJECT_RE: OnceLock<Regex> = OnceLock::new();

pub const INVALID_GITHUB_DETAILS: &str = "Error: Invalid GitHub file details provided. Please use owner/repo/branch/filepath format, or provide valid Python code.";

/// 获取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// 待加工的源代码
    Source(String),
    /// 无法获取；附带给用户的说明
    Rejected(String),
}

/// 取第一个 ``` 代码块的内容
pub fn extract_code_block(text: &str) -> Option<String> {
    let re = CODE_BLOCK_RE
        .get_or_init(|| Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n(.*?)```").unwrap());
    re.captures(text)
        .map(|caps| caps[1].trim_end().to_string())
        .filter(|code| !code.trim().is_empty())
}

/// 从模型回复中取出 JSON 对象（允许被代码块或说明文字包裹）
fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let re = JSON_OBJECT_RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap());
    let candidate = re.find(text)?.as_str();
    serde_json::from_str(candidate).ok()
}

/// 源代码获取器
pub struct SourceAcquirer {
    locator: LlmStage,
    github: Arc<dyn Tool>,
}

impl SourceAcquirer {
    pub fn new(locator: LlmStage, github: Arc<dyn Tool>) -> Self {
        Self { locator, github }
    }

    /// 用户直接贴出的代码
    pub fn from_raw(&self, user_text: &str) -> String {
        extract_code_block(user_text).unwrap_or_else(|| user_text.trim().to_string())
    }

    /// 从 GitHub 读取用户指定的文件
    pub async fn from_github(
        &self,
        user_text: &str,
        state: &SessionState,
    ) -> Result<Acquired, PipelineError> {
        let location = match GithubLocation::parse(user_text) {
            Some(location) => location,
            None => match self.locate(state).await? {
                Some(location) => location,
                None => {
                    tracing::warn!("Could not determine GitHub file location from input");
                    return Ok(Acquired::Rejected(INVALID_GITHUB_DETAILS.to_string()));
                }
            },
        };

        let args = serde_json::to_value(&location).unwrap_or_default();
        match self.github.execute(args).await {
            Ok(content) if content.trim().is_empty() => Ok(Acquired::Rejected(format!(
                "Error: the file `{}` in {}/{} ({}) is empty.",
                location.filepath, location.owner, location.repo, location.branch
            ))),
            Ok(content) => Ok(Acquired::Source(content)),
            Err(e) => {
                tracing::warn!("Reading GitHub file failed: {}", e);
                Ok(Acquired::Rejected(format!(
                    "Error: could not read `{}` from {}/{} ({}). {}",
                    location.filepath, location.owner, location.repo, location.branch, e
                )))
            }
        }
    }

    /// 让定位阶段按工具参数 schema 给出文件位置
    async fn locate(&self, state: &SessionState) -> Result<Option<GithubLocation>, PipelineError> {
        let reply = self.locator.run(state).await?;
        let location = extract_json_object(&reply)
            .and_then(|value| serde_json::from_value::<GithubLocation>(value).ok())
            .filter(GithubLocation::is_complete);
        tracing::debug!(?location, "locator reply parsed");
        Ok(location)
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.github
    }
}
