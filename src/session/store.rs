//! 会话存储抽象层
//!
//! 定义统一的会话管理接口，支持内存和 SQLite 两种实现

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::{Session, SessionKey};
use crate::core::SessionError;
use crate::pipeline::event::Event;
use crate::pipeline::state::SessionState;

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 创建会话；session_id 为 None 时生成新 ID，ID 已存在时返回 AlreadyExists
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: SessionState,
    ) -> Result<Session, SessionError>;

    /// 获取会话（含事件）
    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError>;

    /// 列出用户的会话（不含事件）
    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, SessionError>;

    /// 删除会话及其事件
    async fn delete_session(&self, key: &SessionKey) -> Result<(), SessionError>;

    /// 持久化事件并把状态增量合并进会话状态
    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<(), SessionError>;
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: SessionState,
    ) -> Result<Session, SessionError> {
        let id = session_id.unwrap_or_else(new_session_id);
        let key = SessionKey::new(app_name, user_id, &id);

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&key) {
            return Err(SessionError::AlreadyExists(id));
        }
        let session = Session::new(key.clone(), state);
        sessions.insert(key, session.clone());
        Ok(session)
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<Session> = sessions
            .values()
            .filter(|s| s.app_name == app_name && s.user_id == user_id)
            .map(|s| s.clone().without_events())
            .collect();
        list.sort_by(|a, b| a.last_update_time.total_cmp(&b.last_update_time).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))
    }

    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(key)
            .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))?;
        session.apply_event(event.clone());
        Ok(())
    }
}

/// 按配置创建会话存储：给出数据库路径时使用 SQLite，打开失败则退回内存存储
pub async fn create_session_store(db_path: Option<&Path>) -> Arc<dyn SessionStore> {
    match db_path {
        #[cfg(feature = "sqlite")]
        Some(path) => match super::sqlite::SqliteSessionStore::open(path).await {
            Ok(store) => {
                tracing::info!("Using SQLite session store at {}", path.display());
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to open session database {} ({}), using in-memory sessions",
                    path.display(),
                    e
                );
                Arc::new(MemorySessionStore::new())
            }
        },
        #[cfg(not(feature = "sqlite"))]
        Some(path) => {
            tracing::warn!(
                "Built without the sqlite feature, ignoring {} and using in-memory sessions",
                path.display()
            );
            Arc::new(MemorySessionStore::new())
        }
        None => {
            tracing::info!("Using in-memory session store");
            Arc::new(MemorySessionStore::new())
        }
    }
}
