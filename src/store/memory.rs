//! 内存任务存储
//!
//! 与 SQLite 后端语义一致（CAS / TTL / 活跃索引），供测试与未配置 db_path 时使用。

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{StoreError, TaskStore, VersionedDoc};

struct DocEntry {
    doc: String,
    version: u64,
    expires_at: DateTime<Utc>,
}

impl DocEntry {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// 内存版任务存储
#[derive(Default)]
pub struct InMemoryTaskStore {
    docs: RwLock<HashMap<String, DocEntry>>,
    live_index: RwLock<HashSet<String>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn read_doc(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(key).filter(|e| !e.is_expired()).map(|e| VersionedDoc {
            doc: e.doc.clone(),
            version: e.version,
        }))
    }

    async fn write_doc(
        &self,
        key: &str,
        doc: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut docs = self.docs.write().await;
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));

        let current_version = docs.get(key).filter(|e| !e.is_expired()).map(|e| e.version).unwrap_or(0);
        if current_version != expected_version {
            return Err(StoreError::VersionConflict(key.to_string()));
        }

        let new_version = expected_version + 1;
        docs.insert(
            key.to_string(),
            DocEntry {
                doc: doc.to_string(),
                version: new_version,
                expires_at,
            },
        );
        Ok(new_version)
    }

    async fn remove_doc(&self, key: &str) -> Result<(), StoreError> {
        self.docs.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn index_put(&self, task_id: &str) -> Result<(), StoreError> {
        self.live_index.write().await.insert(task_id.to_string());
        Ok(())
    }

    async fn index_remove(&self, task_id: &str) -> Result<(), StoreError> {
        self.live_index.write().await.remove(task_id);
        Ok(())
    }

    async fn live_task_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.live_index.read().await.iter().cloned().collect())
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|_, e| !e.is_expired());
        Ok(before - docs.len())
    }
}
