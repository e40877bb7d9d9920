//! SQLite 会话存储
//!
//! 会话状态与事件持久化到 SQLite，服务重启后会话可继续使用。
//! 事件按写入顺序（自增 seq）读回。

#![cfg(feature = "sqlite")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;

use super::model::{Session, SessionKey};
use super::store::{new_session_id, SessionStore};
use crate::core::SessionError;
use crate::pipeline::event::{now_secs, Event};
use crate::pipeline::state::SessionState;

/// SQLite 会话存储
pub struct SqliteSessionStore {
    pool: SqlitePool,
    /// 写事务串行执行；append_event 是读-改-写，并发的延迟事务会丢更新或 SQLITE_BUSY
    write_lock: Mutex<()>,
}

impl SqliteSessionStore {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                app_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                state TEXT NOT NULL,
                create_time REAL NOT NULL,
                update_time REAL NOT NULL,
                PRIMARY KEY (app_name, user_id, id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                app_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                id TEXT NOT NULL,
                timestamp REAL NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_session ON events(app_name, user_id, session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_events(&self, key: &SessionKey) -> Result<Vec<Event>, SessionError> {
        let rows = sqlx::query(
            "SELECT body FROM events
             WHERE app_name = ? AND user_id = ? AND session_id = ?
             ORDER BY seq ASC",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.try_get("body")?;
            match serde_json::from_str(&body) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping unreadable event in session {}: {}", key.session_id, e),
            }
        }
        Ok(events)
    }
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session, SessionError> {
    let state: String = row.try_get("state")?;
    Ok(Session {
        id: row.try_get("id")?,
        app_name: row.try_get("app_name")?,
        user_id: row.try_get("user_id")?,
        state: serde_json::from_str(&state)?,
        events: Vec::new(),
        last_update_time: row.try_get("update_time")?,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: SessionState,
    ) -> Result<Session, SessionError> {
        let id = session_id.unwrap_or_else(new_session_id);
        let now = now_secs();
        let state_json = serde_json::to_string(&state)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(app_name)
            .bind(user_id)
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(SessionError::AlreadyExists(id));
        }

        sqlx::query(
            "INSERT INTO sessions (app_name, user_id, id, state, create_time, update_time)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(app_name)
        .bind(user_id)
        .bind(&id)
        .bind(&state_json)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Session {
            id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state,
            events: Vec::new(),
            last_update_time: now,
        })
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query(
            "SELECT app_name, user_id, id, state, update_time FROM sessions
             WHERE app_name = ? AND user_id = ? AND id = ?",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut session = session_from_row(&row)?;
        session.events = self.load_events(key).await?;
        Ok(Some(session))
    }

    async fn list_sessions(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, SessionError> {
        let rows = sqlx::query(
            "SELECT app_name, user_id, id, state, update_time FROM sessions
             WHERE app_name = ? AND user_id = ?
             ORDER BY update_time ASC, id ASC",
        )
        .bind(app_name)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(SessionError::NotFound(key.session_id.clone()));
        }

        sqlx::query("DELETE FROM events WHERE app_name = ? AND user_id = ? AND session_id = ?")
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_event(&self, key: &SessionKey, event: &Event) -> Result<(), SessionError> {
        let body = serde_json::to_string(event)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT state FROM sessions WHERE app_name = ? AND user_id = ? AND id = ?")
            .bind(&key.app_name)
            .bind(&key.user_id)
            .bind(&key.session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| SessionError::NotFound(key.session_id.clone()))?;

        let state_json: String = row.try_get("state")?;
        let mut state: SessionState = serde_json::from_str(&state_json)?;
        state.apply_delta(&event.actions.state_delta);

        sqlx::query(
            "UPDATE sessions SET state = ?, update_time = ?
             WHERE app_name = ? AND user_id = ? AND id = ?",
        )
        .bind(serde_json::to_string(&state)?)
        .bind(event.timestamp)
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO events (app_name, user_id, session_id, id, timestamp, body)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.app_name)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(&event.id)
        .bind(event.timestamp)
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
