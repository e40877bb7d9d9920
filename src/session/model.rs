//! 会话数据结构

use serde::{Deserialize, Serialize};

use crate::pipeline::event::{now_secs, Event};
use crate::pipeline::state::SessionState;

/// 会话定位：应用 + 用户 + 会话 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// 单个会话：状态 + 事件流水
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub events: Vec<Event>,
    /// Unix 时间（秒）
    pub last_update_time: f64,
}

impl Session {
    pub fn new(key: SessionKey, state: SessionState) -> Self {
        Self {
            id: key.session_id,
            app_name: key.app_name,
            user_id: key.user_id,
            state,
            events: Vec::new(),
            last_update_time: now_secs(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }

    /// 追加事件并合并其状态增量
    pub fn apply_event(&mut self, event: Event) {
        self.state.apply_delta(&event.actions.state_delta);
        self.last_update_time = event.timestamp;
        self.events.push(event);
    }

    /// 列表接口不返回事件
    pub fn without_events(mut self) -> Self {
        self.events.clear();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::StateDelta;
    use serde_json::json;

    #[test]
    fn test_apply_event_merges_delta() {
        let mut session = Session::new(SessionKey::new("git_agent", "u1", "s1"), SessionState::new());
        let mut delta = StateDelta::new();
        delta.insert("final_output".into(), json!("ok"));
        let event = Event::new("e-1", "CodePipelineFlow").with_delta(delta);
        let ts = event.timestamp;

        session.apply_event(event);
        assert_eq!(session.state.get_str("final_output"), Some("ok"));
        assert_eq!(session.last_update_time, ts);

        let value = serde_json::to_value(session.without_events()).unwrap();
        assert_eq!(value["appName"], "git_agent");
        assert_eq!(value["events"], json!([]));
    }
}
