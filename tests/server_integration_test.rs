//! Web API 集成测试：本地启动服务，用 reqwest 调用

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use codebuddy::llm::MockLlmClient;
    use codebuddy::pipeline::{FlowAgent, StageClients};
    use codebuddy::runner::Runner;
    use codebuddy::server::{create_router, ServerState};
    use codebuddy::session::MemorySessionStore;
    use codebuddy::tools::GithubRawTool;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    const APP: &str = "git_agent";

    async fn spawn_server(mock: Arc<MockLlmClient>) -> String {
        let agent = FlowAgent::from_clients(
            StageClients::uniform(mock),
            Arc::new(GithubRawTool::default()),
            10,
        );
        let runner = Runner::new(APP, Arc::new(agent), Arc::new(MemorySessionStore::new()));
        let router = create_router(
            ServerState::new(runner, CancellationToken::new()),
            &["*".to_string()],
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn run_body(session_id: &str, text: &str) -> Value {
        json!({
            "appName": APP,
            "userId": "u1",
            "sessionId": session_id,
            "newMessage": { "role": "user", "parts": [{ "text": text }] },
            "streaming": false
        })
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let base = spawn_server(Arc::new(MockLlmClient::new())).await;
        let client = reqwest::Client::new();
        let sessions = format!("{}/apps/{}/users/u1/sessions", base, APP);

        let health: Value = client.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");
        let apps: Vec<String> = client.get(format!("{}/list-apps", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(apps, vec![APP.to_string()]);

        // 生成 ID
        let created: Value = client.post(&sessions).send().await.unwrap().json().await.unwrap();
        assert!(!created["id"].as_str().unwrap().is_empty());
        assert_eq!(created["userId"], "u1");

        // 指定 ID + 初始状态
        let resp = client
            .post(format!("{}/s1", sessions))
            .json(&json!({ "theme": "dark" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let dup = client.post(format!("{}/s1", sessions)).send().await.unwrap();
        assert_eq!(dup.status(), 409);

        let listed: Vec<Value> = client.get(&sessions).send().await.unwrap().json().await.unwrap();
        assert_eq!(listed.len(), 2);

        let one: Value = client.get(format!("{}/s1", sessions)).send().await.unwrap().json().await.unwrap();
        assert_eq!(one["state"]["theme"], "dark");

        let unknown_app = client
            .post(format!("{}/apps/other/users/u1/sessions", base))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown_app.status(), 404);

        let deleted = client.delete(format!("{}/s1", sessions)).send().await.unwrap();
        assert_eq!(deleted.status(), 200);
        let gone = client.get(format!("{}/s1", sessions)).send().await.unwrap();
        assert_eq!(gone.status(), 404);
    }

    #[tokio::test]
    async fn test_run_returns_events_with_final_output() {
        let mock = Arc::new(MockLlmClient::with_replies(["python_code", "r", "d", "```python\n# tests\n```"]));
        let base = spawn_server(mock).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/apps/{}/users/u1/sessions/s1", base, APP))
            .send()
            .await
            .unwrap();

        let events: Vec<Value> = client
            .post(format!("{}/run", base))
            .json(&run_body("s1", "x = 1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let final_output = events
            .iter()
            .find_map(|e| e["actions"]["stateDelta"]["final_output"].as_str())
            .unwrap();
        assert_eq!(final_output, "```python\n# tests\n```");

        let session: Value = client
            .get(format!("{}/apps/{}/users/u1/sessions/s1", base, APP))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["events"][0]["author"], "user");
        assert_eq!(session["state"]["history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_rejects_bad_requests() {
        let base = spawn_server(Arc::new(MockLlmClient::new())).await;
        let client = reqwest::Client::new();

        let missing = client
            .post(format!("{}/run", base))
            .json(&run_body("nope", "x = 1"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        client
            .post(format!("{}/apps/{}/users/u1/sessions/s1", base, APP))
            .send()
            .await
            .unwrap();
        let empty = client
            .post(format!("{}/run", base))
            .json(&run_body("s1", "   "))
            .send()
            .await
            .unwrap();
        assert_eq!(empty.status(), 400);
    }

    #[tokio::test]
    async fn test_run_sse_streams_each_event() {
        let mock = Arc::new(MockLlmClient::with_replies(["Please send Python code."]));
        let base = spawn_server(mock).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/apps/{}/users/u1/sessions/s1", base, APP))
            .send()
            .await
            .unwrap();

        let resp = client
            .post(format!("{}/run_sse", base))
            .json(&run_body("s1", "hello"))
            .send()
            .await
            .unwrap();
        assert!(resp.headers()["content-type"].to_str().unwrap().starts_with("text/event-stream"));

        let body = resp.text().await.unwrap();
        let events: Vec<Value> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["actions"]["stateDelta"]["final_output"], "Please send Python code.");
    }
}
