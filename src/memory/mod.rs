//! 记忆层：发给模型的对话窗口（完整历史保存在会话状态中）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role};
