//! 会话管理：会话状态与事件的存储

pub mod model;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use model::{Session, SessionKey};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
pub use store::{create_session_store, MemorySessionStore, SessionStore};
