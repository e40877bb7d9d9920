//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序返回预置回复；预置回复用完后回显最后一条 User 消息。每次请求都会被记录，便于断言 Prompt。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置成功回复（按调用顺序返回）
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(reply.into()));
        }
    }

    /// 预置一次失败（返回 LlmError::Api）
    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(message.into()));
        }
    }

    /// 已收到的全部请求
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::Api(message)),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(format!("Echo from Mock: {}", last_user))
            }
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
