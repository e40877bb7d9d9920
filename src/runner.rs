//! 运行器：把一条用户消息交给流水线，并持久化产生的事件
//!
//! 流程：加载会话 → 记录用户事件 → 后台任务中运行 FlowAgent（操作状态副本）
//! → 每个事件按顺序写入存储并转发给调用方。流水线出错或事件写入失败时补发一条带 errorMessage 的事件。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::SessionError;
use crate::pipeline::event::{new_invocation_id, Content, Event};
use crate::pipeline::FlowAgent;
use crate::session::{SessionKey, SessionStore};

/// 运行器
#[derive(Clone)]
pub struct Runner {
    app_name: String,
    agent: Arc<FlowAgent>,
    sessions: Arc<dyn SessionStore>,
}

impl Runner {
    pub fn new(app_name: impl Into<String>, agent: Arc<FlowAgent>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            sessions,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// 启动一次运行，返回事件接收端（通道关闭即运行结束）
    pub async fn run_stream(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
    ) -> Result<mpsc::UnboundedReceiver<Event>, SessionError> {
        let key = SessionKey::new(&self.app_name, user_id, session_id);
        let session = self
            .sessions
            .get_session(&key)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let invocation_id = new_invocation_id();
        let user_text = new_message.text();
        let user_event = Event::new(&invocation_id, "user").with_content(new_message);
        self.sessions.append_event(&key, &user_event).await?;

        tracing::info!(
            session_id = %session_id,
            invocation_id = %invocation_id,
            "Starting pipeline run"
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let agent = Arc::clone(&self.agent);
        let sessions = Arc::clone(&self.sessions);
        let mut state = session.state;

        tokio::spawn(async move {
            let (flow_tx, mut flow_rx) = mpsc::unbounded_channel::<Event>();

            let run = {
                let agent = Arc::clone(&agent);
                let invocation_id = invocation_id.clone();
                async move {
                    let result = agent.run(&mut state, &user_text, &invocation_id, &flow_tx).await;
                    drop(flow_tx);
                    result
                }
            };
            // 写入失败即停止转发：未落库的状态不能让调用方当作已生效
            let forward = async {
                let mut flow_rx = flow_rx;
                while let Some(event) = flow_rx.recv().await {
                    if let Err(e) = sessions.append_event(&key, &event).await {
                        return Some(e);
                    }
                    let _ = out_tx.send(event);
                }
                None
            };

            let (result, persist_error) = tokio::join!(run, forward);
            if let Some(e) = persist_error {
                tracing::error!(
                    invocation_id = %invocation_id,
                    "Failed to persist event for session {}: {}",
                    key.session_id,
                    e
                );
                let event = Event::new(&invocation_id, agent.name())
                    .with_error(format!("failed to persist session event: {}", e));
                let _ = out_tx.send(event);
            } else if let Err(e) = result {
                tracing::error!(invocation_id = %invocation_id, "Pipeline run failed: {}", e);
                let event = Event::new(&invocation_id, agent.name()).with_error(e.to_string());
                if let Err(e) = sessions.append_event(&key, &event).await {
                    tracing::warn!("Failed to persist error event for session {}: {}", key.session_id, e);
                }
                let _ = out_tx.send(event);
            }
        });

        Ok(out_rx)
    }

    /// 运行并收集全部事件
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: Content,
    ) -> Result<Vec<Event>, SessionError> {
        let mut rx = self.run_stream(user_id, session_id, new_message).await?;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::pipeline::state::{SessionState, FINAL_OUTPUT};
    use crate::pipeline::StageClients;
    use crate::session::{MemorySessionStore, Session};
    use async_trait::async_trait;
    use crate::tools::GithubRawTool;

    fn runner(mock: Arc<MockLlmClient>) -> Runner {
        let agent = FlowAgent::from_clients(StageClients::uniform(mock), Arc::new(GithubRawTool::default()), 10);
        Runner::new("git_agent", Arc::new(agent), Arc::new(MemorySessionStore::new()))
    }

    #[tokio::test]
    async fn test_run_persists_events_and_state() {
        let mock = Arc::new(MockLlmClient::with_replies(["python_code", "r", "d", "final tests"]));
        let runner = runner(mock);
        runner
            .sessions()
            .create_session("git_agent", "u1", Some("s1".into()), SessionState::new())
            .await
            .unwrap();

        let events = runner.run("u1", "s1", Content::user("x = 1")).await.unwrap();
        assert_eq!(events.last().unwrap().actions.state_delta[FINAL_OUTPUT], "final tests");
        assert!(events.iter().all(|e| e.author != "user"));

        let session = runner
            .sessions()
            .get_session(&SessionKey::new("git_agent", "u1", "s1"))
            .await
            .unwrap()
            .unwrap();
        // 用户事件 + 流水线事件
        assert_eq!(session.events.len(), events.len() + 1);
        assert_eq!(session.events[0].text(), "x = 1");
        assert_eq!(session.state.get_str(FINAL_OUTPUT), Some("final tests"));
        assert_eq!(session.state.history().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let runner = runner(Arc::new(MockLlmClient::new()));
        let err = runner.run("u1", "nope", Content::user("hi")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    /// 写入 final_output 时失败的存储
    struct FailingStore {
        inner: MemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn create_session(
            &self,
            app_name: &str,
            user_id: &str,
            session_id: Option<String>,
            state: SessionState,
        ) -> Result<Session, SessionError> {
            self.inner.create_session(app_name, user_id, session_id, state).await
        }

        async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
            self.inner.get_session(key).await
        }

        async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, SessionError> {
            self.inner.list_sessions(app_name, user_id).await
        }

        async fn delete_session(&self, key: &SessionKey) -> Result<(), SessionError> {
            self.inner.delete_session(key).await
        }

        async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<(), SessionError> {
            if event.actions.state_delta.contains_key(FINAL_OUTPUT) {
                return Err(SessionError::Storage("disk full".into()));
            }
            self.inner.append_event(key, event).await
        }
    }

    #[tokio::test]
    async fn test_persist_failure_stops_forwarding() {
        let mock = Arc::new(MockLlmClient::with_replies(["python_code", "r", "d", "final tests"]));
        let agent = FlowAgent::from_clients(StageClients::uniform(mock), Arc::new(GithubRawTool::default()), 10);
        let store = Arc::new(FailingStore {
            inner: MemorySessionStore::new(),
        });
        let runner = Runner::new("git_agent", Arc::new(agent), store);
        runner
            .sessions()
            .create_session("git_agent", "u1", Some("s1".into()), SessionState::new())
            .await
            .unwrap();

        let events = runner.run("u1", "s1", Content::user("x = 1")).await.unwrap();
        assert!(events.iter().all(|e| !e.actions.state_delta.contains_key(FINAL_OUTPUT)));
        let last = events.last().unwrap();
        assert!(last.error_message.as_deref().unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_pipeline_error_becomes_error_event() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error("upstream unavailable");
        let runner = runner(mock);
        runner
            .sessions()
            .create_session("git_agent", "u1", Some("s1".into()), SessionState::new())
            .await
            .unwrap();

        let events = runner.run("u1", "s1", Content::user("x = 1")).await.unwrap();
        assert_eq!(events.len(), 1);
        let message = events[0].error_message.as_deref().unwrap();
        assert!(message.contains("input_decide"));
        assert!(message.contains("upstream unavailable"));
    }
}
