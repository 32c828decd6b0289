//! SQLite 任务存储
//!
//! 每个 key 一行（doc JSON + version + expires_at 毫秒时间戳），
//! 条件写用 `WHERE version = ?` 的 UPDATE 实现；活跃任务集合单独一张索引表。
//! 服务重启后文档仍在：进行中任务 miss 即「从头开始」，不做任何急切恢复。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;

use super::{StoreError, TaskStore, VersionedDoc};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// SQLite 版任务存储
pub struct SqliteTaskStore {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteTaskStore {
    /// 打开（或创建）数据库并建表
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_documents (
                key TEXT PRIMARY KEY,
                doc TEXT NOT NULL,
                version INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE TABLE IF NOT EXISTS live_tasks (task_id TEXT PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv_documents(expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 关闭连接池（优雅关闭的最后一步）
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn read_doc(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let row = sqlx::query("SELECT doc, version FROM kv_documents WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(Self::now_millis())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| VersionedDoc {
            doc: r.get("doc"),
            version: r.get::<i64, _>("version") as u64,
        }))
    }

    async fn write_doc(
        &self,
        key: &str,
        doc: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let now = Self::now_millis();
        let expires_at = now + ttl.as_millis() as i64;

        if expected_version == 0 {
            // 过期残留的行让位给新建
            sqlx::query("DELETE FROM kv_documents WHERE key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await?;

            let result = sqlx::query(
                "INSERT INTO kv_documents (key, doc, version, expires_at)
                 VALUES (?, ?, 1, ?)
                 ON CONFLICT(key) DO NOTHING",
            )
            .bind(key)
            .bind(doc)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::VersionConflict(key.to_string()));
            }
            return Ok(1);
        }

        let new_version = expected_version + 1;
        let result = sqlx::query(
            "UPDATE kv_documents SET doc = ?, version = ?, expires_at = ?
             WHERE key = ? AND version = ? AND expires_at > ?",
        )
        .bind(doc)
        .bind(new_version as i64)
        .bind(expires_at)
        .bind(key)
        .bind(expected_version as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict(key.to_string()));
        }
        Ok(new_version)
    }

    async fn remove_doc(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_documents WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // LIKE 的 % 通配在末尾，prefix 自身不含通配符
        let pattern = format!("{}%", prefix.replace('%', "").replace('_', "\\_"));
        let rows = sqlx::query(
            "SELECT key FROM kv_documents WHERE key LIKE ? ESCAPE '\\' AND expires_at > ?",
        )
        .bind(&pattern)
        .bind(Self::now_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("key")).collect())
    }

    async fn index_put(&self, task_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO live_tasks (task_id) VALUES (?)")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn index_remove(&self, task_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM live_tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn live_task_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT task_id FROM live_tasks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("task_id")).collect())
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM kv_documents WHERE expires_at <= ?")
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Message;
    use crate::store::{PersistedTask, TaskState};

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");

        {
            let store = SqliteTaskStore::new(&db_path).await.unwrap();
            let mut task = PersistedTask::new("task_1", "ctx_1");
            task.history.push(Message::user("dim the lights"));
            task.history.push(Message::assistant("done"));
            store.put_task(&task, TTL).await.unwrap();
            store.close().await;
        }

        // 模拟进程重启：重新打开同一文件
        let store = SqliteTaskStore::new(&db_path).await.unwrap();
        let loaded = store.get_task("task_1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskState::Submitted);
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[0].content, "dim the lights");
    }

    #[tokio::test]
    async fn test_concurrent_stale_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap();

        store.put_task(&PersistedTask::new("task_1", "ctx_1"), TTL).await.unwrap();

        let mut a = store.get_task("task_1").await.unwrap().unwrap();
        let mut b = store.get_task("task_1").await.unwrap().unwrap();
        a.status = TaskState::Working;
        b.status = TaskState::Working;

        let ra = store.put_task(&a, TTL).await;
        let rb = store.put_task(&b, TTL).await;
        assert!(ra.is_ok() != rb.is_ok(), "exactly one writer must win");
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap();

        store
            .write_doc("task:gone", "{}", 0, Duration::from_millis(0))
            .await
            .unwrap();
        store.write_doc("task:kept", "{}", 0, TTL).await.unwrap();

        let removed = store.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.read_doc("task:kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap();

        store.write_doc("task:t1:notification:n1", "{}", 0, TTL).await.unwrap();
        store.write_doc("task:t1:notification:n2", "{}", 0, TTL).await.unwrap();
        store.write_doc("task:t2:notification:n1", "{}", 0, TTL).await.unwrap();

        let mut keys = store.keys_with_prefix("task:t1:notification:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task:t1:notification:n1", "task:t1:notification:n2"]);
    }
}
