//! 流水线编排器
//!
//! 一轮请求：记录用户输入 → 分类 → 按分类准备源代码（读 GitHub / 原样使用 / 生成 / 沿用已获取的源代码）
//! → 重构 → 文档 → 单元测试 → 写出 final_output。
//! 每一步都以事件的形式发出，事件的状态增量在发出前已合并进传入的 SessionState。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::PipelineError;
use crate::llm::LlmClient;
use crate::pipeline::event::{Content, Event};
use crate::pipeline::input::InputKind;
use crate::pipeline::prompts;
use crate::pipeline::source::{Acquired, SourceAcquirer};
use crate::pipeline::stage::LlmStage;
use crate::pipeline::state::{
    history_value, HistoryEntry, SessionState, StateDelta, DOCUMENTED_CODE, FILE_CONTENT,
    FINAL_CODE, FINAL_OUTPUT, HISTORY, INPUT_TYPE, REFACTORED_CODE,
};
use crate::tools::Tool;

pub const FLOW_NAME: &str = "CodePipelineFlow";

pub const MISSING_CODE_MESSAGE: &str = "I don't have a code to fullfill your request. Please provide the code or github access details.";
pub const NO_VALID_RESPONSE: &str = "No valid response";

/// 各阶段使用的模型客户端
#[derive(Clone)]
pub struct StageClients {
    pub classifier: Arc<dyn LlmClient>,
    pub locator: Arc<dyn LlmClient>,
    pub generator: Arc<dyn LlmClient>,
    pub refactor: Arc<dyn LlmClient>,
    pub documenter: Arc<dyn LlmClient>,
    pub tester: Arc<dyn LlmClient>,
}

impl StageClients {
    /// 所有阶段共用一个客户端
    pub fn uniform(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            classifier: llm.clone(),
            locator: llm.clone(),
            generator: llm.clone(),
            refactor: llm.clone(),
            documenter: llm.clone(),
            tester: llm,
        }
    }
}

/// 单元测试生成流水线
pub struct FlowAgent {
    name: String,
    classifier: LlmStage,
    acquirer: SourceAcquirer,
    generator: LlmStage,
    pipeline: Vec<LlmStage>,
}

impl FlowAgent {
    pub fn from_clients(clients: StageClients, github: Arc<dyn Tool>, max_context_turns: usize) -> Self {
        let schema = serde_json::to_string_pretty(&github.parameters_schema()).unwrap_or_default();
        let locator_instruction = format!("{}{}\n", prompts::LOCATOR_INSTRUCTION, schema);

        let stage = |name: &str, instruction: &str, output_key: &str, llm: Arc<dyn LlmClient>| {
            LlmStage::new(name, instruction, output_key, llm).with_max_context_turns(max_context_turns)
        };

        let classifier = stage("input_decide", prompts::CLASSIFIER_INSTRUCTION, INPUT_TYPE, clients.classifier)
            .with_description("Decides what kind of input the user sent");
        let locator = stage("file_locator", &locator_instruction, "github_location", clients.locator)
            .with_description("Extracts GitHub file coordinates from the user message");
        let generator = stage("code_create", prompts::GENERATOR_INSTRUCTION, FILE_CONTENT, clients.generator)
            .with_description("Writes Python code from the user's instructions");
        let pipeline = vec![
            stage("refactor", prompts::REFACTOR_INSTRUCTION, REFACTORED_CODE, clients.refactor)
                .with_description("Refactors the source code"),
            stage("documentation", prompts::DOCUMENTER_INSTRUCTION, DOCUMENTED_CODE, clients.documenter)
                .with_description("Adds docstrings and comments"),
            stage("unit_test", prompts::TESTER_INSTRUCTION, FINAL_CODE, clients.tester)
                .with_description("Writes unit tests and merges them with the code"),
        ];

        Self {
            name: FLOW_NAME.to_string(),
            classifier,
            acquirer: SourceAcquirer::new(locator, github),
            generator,
            pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 重构 → 文档 → 测试 三个顺序阶段
    pub fn pipeline_stages(&self) -> &[LlmStage] {
        &self.pipeline
    }

    /// 执行一轮；事件按顺序写入 `events`，状态变化同步合并进 `state`
    pub async fn run(
        &self,
        state: &mut SessionState,
        user_text: &str,
        invocation_id: &str,
        events: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), PipelineError> {
        state.push_history(HistoryEntry::user(user_text));

        let classification = self.classifier.run(state).await?;
        self.emit_stage(&self.classifier, classification.clone(), state, invocation_id, events);

        let Some(kind) = InputKind::parse(&classification) else {
            tracing::warn!("Classifier returned an empty answer, stopping");
            return Ok(());
        };
        tracing::info!(input_type = %kind, "input classified");

        match kind {
            InputKind::Invalid(message) => {
                self.finish(message, state, invocation_id, events);
                return Ok(());
            }
            InputKind::PythonCode => {
                let code = self.acquirer.from_raw(user_text);
                self.emit_source(&self.name, code, state, invocation_id, events);
            }
            InputKind::GithubDetails => match self.acquirer.from_github(user_text, state).await? {
                Acquired::Source(code) => {
                    let author = self.acquirer.tool().name().to_string();
                    self.emit_source(&author, code, state, invocation_id, events);
                }
                Acquired::Rejected(message) => {
                    self.finish(message, state, invocation_id, events);
                    return Ok(());
                }
            },
            InputKind::CodeGeneration => {
                let code = self.generator.run(state).await?;
                self.emit_stage(&self.generator, code, state, invocation_id, events);
            }
            InputKind::CodeModification => {
                if !state.has_text(FINAL_CODE) {
                    self.finish(MISSING_CODE_MESSAGE.to_string(), state, invocation_id, events);
                    return Ok(());
                }
                // 沿用上次获取的源代码；仅在缺失时退回上一轮产物
                if !state.has_text(FILE_CONTENT) {
                    let previous = state.get_str(FINAL_CODE).unwrap_or_default().to_string();
                    self.emit_source(&self.name, previous, state, invocation_id, events);
                }
            }
        }

        for stage in &self.pipeline {
            let reply = stage.run(state).await?;
            self.emit_stage(stage, reply, state, invocation_id, events);
        }

        let output = state
            .get_str(FINAL_CODE)
            .filter(|code| !code.trim().is_empty())
            .unwrap_or(NO_VALID_RESPONSE)
            .to_string();
        self.finish(output, state, invocation_id, events);
        Ok(())
    }

    fn emit_stage(
        &self,
        stage: &LlmStage,
        reply: String,
        state: &mut SessionState,
        invocation_id: &str,
        events: &mpsc::UnboundedSender<Event>,
    ) {
        let mut delta = StateDelta::new();
        delta.insert(stage.output_key().to_string(), reply.clone().into());
        let event = Event::new(invocation_id, stage.name())
            .with_content(Content::model(reply))
            .with_delta(delta);
        emit(event, state, events);
    }

    fn emit_source(
        &self,
        author: &str,
        code: String,
        state: &mut SessionState,
        invocation_id: &str,
        events: &mpsc::UnboundedSender<Event>,
    ) {
        let mut delta = StateDelta::new();
        delta.insert(FILE_CONTENT.to_string(), code.into());
        emit(Event::new(invocation_id, author).with_delta(delta), state, events);
    }

    /// 结束本轮：把回复追加进历史，并发出携带 final_output 与 history 的事件
    fn finish(
        &self,
        output: String,
        state: &mut SessionState,
        invocation_id: &str,
        events: &mpsc::UnboundedSender<Event>,
    ) {
        let history = state.push_history(HistoryEntry::system(output.clone()));

        let mut delta = StateDelta::new();
        delta.insert(FINAL_OUTPUT.to_string(), output.clone().into());
        delta.insert(HISTORY.to_string(), history_value(&history));
        let event = Event::new(invocation_id, &self.name)
            .with_content(Content::model(output))
            .with_delta(delta);
        emit(event, state, events);
    }
}

fn emit(event: Event, state: &mut SessionState, events: &mpsc::UnboundedSender<Event>) {
    state.apply_delta(&event.actions.state_delta);
    if events.send(event).is_err() {
        tracing::debug!("event receiver dropped");
    }
}
