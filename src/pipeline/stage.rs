//! 模型阶段：一次托管模型调用
//!
//! 请求 = 渲染后的指令（system）+ 最近若干条会话历史（最后一条即本轮用户输入）；
//! 回复去掉首尾空白后写入阶段的 output_key。

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::memory::{ConversationMemory, Message};
use crate::pipeline::state::{Owner, SessionState};

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

const DEFAULT_MAX_CONTEXT_TURNS: usize = 10;

/// 把模板中的 `{key}` 替换为状态值；返回 Err(key) 表示引用的键不存在
pub fn render_template(template: &str, state: &SessionState) -> Result<String, String> {
    let re = PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let key = &caps[1];
        let value = state.render_value(key).ok_or_else(|| key.to_string())?;
        out.push_str(&template[last..whole.start]);
        out.push_str(&value);
        last = whole.end;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// 单个模型阶段
pub struct LlmStage {
    name: String,
    description: String,
    instruction: String,
    output_key: String,
    llm: Arc<dyn LlmClient>,
    max_context_turns: usize,
}

impl LlmStage {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        output_key: impl Into<String>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            instruction: instruction.into(),
            output_key: output_key.into(),
            llm,
            max_context_turns: DEFAULT_MAX_CONTEXT_TURNS,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_context_turns(mut self, turns: usize) -> Self {
        self.max_context_turns = turns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn render_instruction(&self, state: &SessionState) -> Result<String, PipelineError> {
        render_template(&self.instruction, state).map_err(|key| PipelineError::MissingStateKey {
            stage: self.name.clone(),
            key,
        })
    }

    /// 组装请求消息：用户条目为 user，系统回复为 assistant
    pub fn build_messages(&self, state: &SessionState) -> Result<Vec<Message>, PipelineError> {
        let instruction = self.render_instruction(state)?;

        let mut window = ConversationMemory::new(self.max_context_turns);
        for entry in state.history() {
            window.push(match entry.owner {
                Owner::User => Message::user(entry.text),
                Owner::System => Message::assistant(entry.text),
            });
        }

        let mut messages = Vec::with_capacity(window.messages().len() + 1);
        messages.push(Message::system(instruction));
        messages.extend(window.into_messages());
        Ok(messages)
    }

    /// 调用模型并返回去掉首尾空白的回复（写入状态由调用方完成）
    pub async fn run(&self, state: &SessionState) -> Result<String, PipelineError> {
        let messages = self.build_messages(state)?;
        let started = Instant::now();
        let before = self.llm.token_usage();

        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| PipelineError::llm(&self.name, e))?;

        let (prompt_tokens, completion_tokens, total_tokens) = usage_since(before, self.llm.token_usage());
        tracing::info!(
            stage = %self.name,
            model = %self.llm.model_name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "stage completed"
        );

        Ok(reply.trim().to_string())
    }
}

/// 两次累计用量之差，即本次调用消耗的 (prompt, completion, total)；客户端可能被多个阶段共享
fn usage_since(before: (u64, u64, u64), after: (u64, u64, u64)) -> (u64, u64, u64) {
    (
        after.0.saturating_sub(before.0),
        after.1.saturating_sub(before.1),
        after.2.saturating_sub(before.2),
    )
}
