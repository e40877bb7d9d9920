//! 流水线集成测试：Mock 模型 + 本地 raw 文件服务

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::Path, http::StatusCode, routing::get, Router};
    use codebuddy::llm::MockLlmClient;
    use codebuddy::pipeline::state::{FILE_CONTENT, FINAL_CODE, FINAL_OUTPUT};
    use codebuddy::pipeline::{Event, FlowAgent, SessionState, StageClients};
    use codebuddy::tools::GithubRawTool;
    use tokio::sync::mpsc;

    const SELECTION_SORT: &str = "def selection_sort(items):\n    return sorted(items)\n";

    async fn serve_raw_files() -> String {
        let app = Router::new().route(
            "/:owner/:repo/:branch/*path",
            get(|Path((owner, repo, branch, path)): Path<(String, String, String, String)>| async move {
                if (owner.as_str(), repo.as_str(), branch.as_str(), path.as_str())
                    == ("ritwikmath", "datastructure-practice", "main", "algorithms/selectionsort.py")
                {
                    Ok(SELECTION_SORT)
                } else {
                    Err(StatusCode::NOT_FOUND)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn agent_with(mock: Arc<MockLlmClient>) -> FlowAgent {
        let raw_base = serve_raw_files().await;
        FlowAgent::from_clients(
            StageClients::uniform(mock),
            Arc::new(GithubRawTool::new(raw_base, 5)),
            10,
        )
    }

    async fn run_turn(agent: &FlowAgent, state: &mut SessionState, text: &str) -> Vec<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        agent.run(state, text, "e-int", &tx).await.unwrap();
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_github_file_goes_through_every_stage() {
        let mock = Arc::new(MockLlmClient::with_replies([
            "github_details",
            "```python\ndef selection_sort(items):\n    return sorted(items)\n```",
            "```python\ndef selection_sort(items):\n    \"\"\"Sort items.\"\"\"\n    return sorted(items)\n```",
            "```python\nimport unittest\n\nclass TestSort(unittest.TestCase):\n    pass\n```",
        ]));
        let agent = agent_with(mock.clone()).await;
        let mut state = SessionState::new();

        let events = run_turn(
            &agent,
            &mut state,
            "Write tests for https://github.com/ritwikmath/datastructure-practice/blob/main/algorithms/selectionsort.py",
        )
        .await;

        assert_eq!(state.get_str(FILE_CONTENT), Some(SELECTION_SORT));
        assert!(state.get_str(FINAL_OUTPUT).unwrap().contains("class TestSort"));
        assert_eq!(events[1].author, "read_file_from_github_raw");
        // URL 可直接解析，不调用定位阶段：分类 + 三个加工阶段
        assert_eq!(mock.call_count(), 4);
        assert!(mock.requests()[1][0].content.contains("def selection_sort(items):"));
    }

    #[tokio::test]
    async fn test_missing_github_file_ends_turn_with_error() {
        let mock = Arc::new(MockLlmClient::with_replies(["github_details"]));
        let agent = agent_with(mock.clone()).await;
        let mut state = SessionState::new();

        run_turn(&agent, &mut state, "octocat/hello/main/missing.py").await;

        let output = state.get_str(FINAL_OUTPUT).unwrap();
        assert!(output.contains("missing.py"));
        assert!(output.contains("404"));
        assert!(state.get(FINAL_CODE).is_none());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_modification_reuses_acquired_source() {
        let mock = Arc::new(MockLlmClient::with_replies([
            "python_code",
            "r1",
            "d1",
            "```python\ndef add(a, b):\n    return a + b\n```",
            "code_modification",
            "r2",
            "d2",
            "```python\ndef add(*xs):\n    return sum(xs)\n```",
        ]));
        let agent = agent_with(mock.clone()).await;
        let mut state = SessionState::new();

        run_turn(&agent, &mut state, "```python\ndef add(a,b): return a+b\n```").await;
        assert_eq!(state.get_str(FILE_CONTENT), Some("def add(a,b): return a+b"));

        run_turn(&agent, &mut state, "make it accept any number of arguments").await;
        // 修改请求沿用首轮获取的源代码，不把带测试的产物再喂回去
        assert_eq!(state.get_str(FILE_CONTENT), Some("def add(a,b): return a+b"));
        assert!(state.get_str(FINAL_OUTPUT).unwrap().contains("sum(xs)"));
        assert_eq!(state.history().len(), 4);

        // 第二轮的重构请求带着上一轮的对话
        let second_refactor = &mock.requests()[5];
        assert!(second_refactor.iter().any(|m| m.content.contains("return a + b")));
        assert_eq!(
            second_refactor.last().unwrap().content,
            "make it accept any number of arguments"
        );
    }
}
