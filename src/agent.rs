//! 流水线装配
//!
//! 按配置为每个阶段创建模型客户端，并组装 FlowAgent。
//! 没有 API Key 或 provider = "mock" 时全部阶段使用 MockLlmClient，便于本地联调。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::pipeline::{FlowAgent, StageClients};
use crate::tools::GithubRawTool;

/// 直连 OpenAI 时去掉 `openai/` 前缀；走兼容网关（配置了 base_url）时原样透传，由网关路由
pub fn resolve_model_name(model: &str, base_url: Option<&str>) -> String {
    match (base_url, model.strip_prefix("openai/")) {
        (None, Some(name)) => name.to_string(),
        _ => model.to_string(),
    }
}

/// 阶段模型；`anthropic/`、`gemini/` 等需经兼容网关路由，未配置 base_url 时退回 llm.model
fn stage_model<'a>(cfg: &'a AppConfig, stage: &'a Option<String>) -> &'a str {
    let model = stage.as_deref().unwrap_or(&cfg.llm.model);
    if cfg.llm.base_url.is_none() && model.contains('/') && !model.starts_with("openai/") {
        tracing::warn!(
            "Model {} requires llm.base_url pointing at a routing gateway, using {}",
            model,
            cfg.llm.model
        );
        return &cfg.llm.model;
    }
    model
}

fn use_mock(cfg: &AppConfig) -> bool {
    cfg.llm.provider.eq_ignore_ascii_case("mock") || std::env::var("OPENAI_API_KEY").is_err()
}

/// 为指定模型创建客户端
pub fn create_llm_for_model(cfg: &AppConfig, model: &str) -> Arc<dyn LlmClient> {
    let base = cfg.llm.base_url.as_deref();
    let model = resolve_model_name(model, base);
    tracing::info!("Using OpenAI-compatible LLM ({})", model);
    Arc::new(
        OpenAiClient::new(base, &model, std::env::var("OPENAI_API_KEY").ok().as_deref())
            .with_timeout(cfg.llm.timeouts.request),
    )
}

/// 按 [llm.stages] 为每个阶段创建客户端；未覆盖的阶段使用 llm.model
pub fn create_stage_clients(cfg: &AppConfig) -> StageClients {
    if use_mock(cfg) {
        tracing::warn!("No API key set or provider is mock, using Mock LLM for every stage");
        return StageClients::uniform(Arc::new(MockLlmClient::new()));
    }

    let stages = &cfg.llm.stages;
    let pick = |stage: &Option<String>| create_llm_for_model(cfg, stage_model(cfg, stage));
    StageClients {
        classifier: pick(&stages.classifier),
        locator: pick(&stages.locator),
        generator: pick(&stages.generator),
        refactor: pick(&stages.refactor),
        documenter: pick(&stages.documenter),
        tester: pick(&stages.tester),
    }
}

/// 按配置组装流水线
pub fn build_flow_agent(cfg: &AppConfig) -> FlowAgent {
    let github = Arc::new(GithubRawTool::new(
        cfg.github.raw_base_url.clone(),
        cfg.github.timeout_secs,
    ));
    FlowAgent::from_clients(create_stage_clients(cfg), github, cfg.app.max_context_turns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_name() {
        assert_eq!(resolve_model_name("openai/gpt-4.1", None), "gpt-4.1");
        assert_eq!(resolve_model_name("gpt-4o-mini", None), "gpt-4o-mini");
        assert_eq!(
            resolve_model_name("gemini/gemini-2.0-flash", Some("http://localhost:4000")),
            "gemini/gemini-2.0-flash"
        );
        assert_eq!(
            resolve_model_name("openai/gpt-4.1", Some("http://localhost:4000")),
            "openai/gpt-4.1"
        );
    }

    #[test]
    fn test_stage_model_without_gateway_falls_back() {
        let mut cfg = AppConfig::default();
        let gemini = Some("gemini/gemini-2.0-flash".to_string());
        assert_eq!(stage_model(&cfg, &gemini), "openai/gpt-4.1");
        assert_eq!(stage_model(&cfg, &None), "openai/gpt-4.1");

        cfg.llm.base_url = Some("http://localhost:4000/v1".into());
        assert_eq!(stage_model(&cfg, &gemini), "gemini/gemini-2.0-flash");
    }

    #[test]
    fn test_mock_provider_builds_agent() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let agent = build_flow_agent(&cfg);
        assert_eq!(agent.pipeline_stages().len(), 3);
        assert_eq!(agent.pipeline_stages()[2].output_key(), "final_code");
    }
}
