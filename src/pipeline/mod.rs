//! 单元测试生成流水线
//!
//! - **state**：会话状态与历史
//! - **event**：事件（与前端约定的 JSON 结构）
//! - **input**：输入分类结果
//! - **stage**：单次模型调用阶段
//! - **source**：源代码获取（原样 / GitHub）
//! - **flow**：编排器

pub mod event;
pub mod flow;
pub mod input;
pub mod prompts;
pub mod source;
pub mod stage;
pub mod state;

pub use event::{new_invocation_id, Content, Event, EventActions, Part};
pub use flow::{FlowAgent, StageClients, FLOW_NAME};
pub use input::InputKind;
pub use source::{Acquired, SourceAcquirer};
pub use stage::LlmStage;
pub use state::{HistoryEntry, Owner, SessionState, StateDelta};
