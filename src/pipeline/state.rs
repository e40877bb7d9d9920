//! 会话状态：各阶段之间传递中间产物的键值表
//!
//! 所有写入都以「状态增量」(state delta) 的形式合并，同一份增量随事件持久化，
//! 因此重放事件即可得到相同的状态。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 对话历史
pub const HISTORY: &str = "history";
/// 输入分类结果（模型原文）
pub const INPUT_TYPE: &str = "input_type";
/// 待加工的源代码
pub const FILE_CONTENT: &str = "file_content";
pub const REFACTORED_CODE: &str = "refactored_code";
pub const DOCUMENTED_CODE: &str = "documented_code";
/// 附带单元测试的最终代码；下一轮 code_modification 以它为基础
pub const FINAL_CODE: &str = "final_code";
/// 本轮返回给用户的文本
pub const FINAL_OUTPUT: &str = "final_output";

/// 状态增量：按键覆盖
pub type StateDelta = Map<String, Value>;

/// 历史条目的发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    User,
    System,
}

/// 历史条目（前端按 owner 渲染左右气泡）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub owner: Owner,
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            owner: Owner::User,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            owner: Owner::System,
            text: text.into(),
        }
    }
}

/// 会话状态（JSON 对象）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState(Map<String, Value>);

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// 键存在且为非空白字符串
    pub fn has_text(&self, key: &str) -> bool {
        self.get_str(key).is_some_and(|s| !s.trim().is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn apply_delta(&mut self, delta: &StateDelta) {
        for (key, value) in delta {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// 用于填充指令模板：字符串原样返回，其它值序列化为 JSON
    pub fn render_value(&self, key: &str) -> Option<String> {
        self.0.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// 读取历史；无法解析的条目被跳过
    pub fn history(&self) -> Vec<HistoryEntry> {
        match self.0.get(HISTORY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 追加历史条目并返回追加后的完整历史
    pub fn push_history(&mut self, entry: HistoryEntry) -> Vec<HistoryEntry> {
        let mut history = self.history();
        history.push(entry);
        self.0.insert(HISTORY.to_string(), history_value(&history));
        history
    }
}

pub fn history_value(history: &[HistoryEntry]) -> Value {
    Value::Array(
        history
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "owner": entry.owner,
                    "text": entry.text,
                })
            })
            .collect(),
    )
}
