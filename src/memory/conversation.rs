//! 短期记忆：发给模型的对话窗口
//!
//! 会话状态里的 history 会一直增长（每轮都附带完整代码产物），送入模型前只保留最近 N 轮。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 最近 N 轮对话（每轮含 user + assistant，故实际保留约 max_turns*2 条消息）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// 超出 max_turns*2 时丢弃最旧的消息；max_turns 为 0 时至少保留最后一条
    fn prune(&mut self) {
        let keep = (self.max_turns * 2).max(1);
        if self.messages.len() > keep {
            self.messages.drain(..self.messages.len() - keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_latest_turns() {
        let mut memory = ConversationMemory::new(1);
        memory.push(Message::user("first"));
        memory.push(Message::assistant("reply"));
        memory.push(Message::user("second"));

        let contents: Vec<_> = memory.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["reply", "second"]);
    }

    #[test]
    fn test_zero_turns_still_keeps_current_input() {
        let mut memory = ConversationMemory::new(0);
        memory.push(Message::user("old"));
        memory.push(Message::user("current"));
        assert_eq!(memory.messages(), &[Message::user("current")]);
    }
}
