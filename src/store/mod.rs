//! 持久化任务存储
//!
//! Redis 风格的版本化 KV：每个 key 一份 JSON 文档 + 版本号 + TTL，
//! 所有写入都是条件写（CAS on version），防止两个 Host 恢复同一任务时互相覆盖。
//! 活跃任务集合作二级索引，枚举 / 清扫无需全量扫描。
//!
//! Key 空间：
//! - `task:{taskId}`                       任务文档
//! - `task:{taskId}:notification:{id}`     推送通知配置
//! - `context:{conversationId}`            编排上下文文档

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Message;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 条件写失败：存储中的版本与调用方最后读到的版本不一致
    #[error("Version conflict on key: {0}")]
    VersionConflict(String),

    #[error("Document not found: {0}")]
    Missing(String),

    #[error("Illegal status transition: {from:?} -> {to:?}")]
    IllegalTransition { from: TaskState, to: TaskState },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 任务状态机
///
/// Submitted → Working → {Completed | Failed | Canceled}（终态）；
/// Working ⇄ InputRequired（Agent 需要澄清时）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// 非终态允许幂等的同态写（崩溃后恢复的任务可能仍是 Working）
    pub fn can_transition(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match (self, next) {
            (Self::Submitted, Self::Working) => true,
            (Self::Submitted, Self::Canceled | Self::Failed) => true,
            (Self::Working, Self::InputRequired) => true,
            (Self::Working, Self::Completed | Self::Failed | Self::Canceled) => true,
            (Self::InputRequired, Self::Working) => true,
            (Self::InputRequired, Self::Canceled | Self::Failed) => true,
            _ => false,
        }
    }
}

/// 持久化任务文档
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTask {
    pub id: String,
    pub context_id: String,
    pub status: TaskState,
    #[serde(default)]
    pub history: Vec<Message>,
    pub updated_at: DateTime<Utc>,
    /// 最后读到的存储版本；条件写的依据，不随文档序列化
    #[serde(skip)]
    pub version: u64,
}

impl PersistedTask {
    pub fn new(id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            status: TaskState::Submitted,
            history: Vec::new(),
            updated_at: Utc::now(),
            version: 0,
        }
    }
}

/// 任务完成推送的通知配置（投递本身在本 crate 范围之外，仅存取）
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotificationConfig {
    pub id: String,
    pub url: String,
    pub token: Option<String>,
}

/// 带版本的原始文档
#[derive(Clone, Debug)]
pub struct VersionedDoc {
    pub doc: String,
    pub version: u64,
}

pub fn task_key(task_id: &str) -> String {
    format!("task:{}", task_id)
}

pub fn notification_key(task_id: &str, config_id: &str) -> String {
    format!("task:{}:notification:{}", task_id, config_id)
}

pub fn context_key(conversation_id: &str) -> String {
    format!("context:{}", conversation_id)
}

/// 条件写的 update_status 重试上限
const STATUS_UPDATE_ATTEMPTS: u32 = 3;

/// 任务存储接口
///
/// 原始文档操作由各后端实现；类型化的任务操作（get/set/update_status/通知配置）
/// 作为默认方法统一实现，保证状态机与序列化逻辑只有一份。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 读取文档；过期或不存在返回 None
    async fn read_doc(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError>;

    /// 条件写：expected_version 必须与存储版本一致（0 表示新建且 key 不得已存在）。
    /// 成功返回新版本号并刷新 TTL。
    async fn write_doc(
        &self,
        key: &str,
        doc: &str,
        expected_version: u64,
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    async fn remove_doc(&self, key: &str) -> Result<(), StoreError>;

    /// 枚举前缀下的 key（通知配置用）
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 活跃任务索引维护
    async fn index_put(&self, task_id: &str) -> Result<(), StoreError>;
    async fn index_remove(&self, task_id: &str) -> Result<(), StoreError>;

    /// 活跃任务 id 集合（二级索引，避免全键空间扫描）
    async fn live_task_ids(&self) -> Result<Vec<String>, StoreError>;

    /// 删除过期文档，返回删除数
    async fn sweep_expired(&self) -> Result<usize, StoreError>;

    /// 读取任务；进行中任务 miss 表示「从头开始」而非错误
    async fn get_task(&self, task_id: &str) -> Result<Option<PersistedTask>, StoreError> {
        match self.read_doc(&task_key(task_id)).await? {
            Some(versioned) => {
                let mut task: PersistedTask = serde_json::from_str(&versioned.doc)?;
                task.version = versioned.version;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// 条件写任务（CAS on task.version），成功返回新版本并刷新 TTL 与活跃索引
    async fn put_task(&self, task: &PersistedTask, ttl: Duration) -> Result<u64, StoreError> {
        let doc = serde_json::to_string(task)?;
        let version = self
            .write_doc(&task_key(&task.id), &doc, task.version, ttl)
            .await?;

        if task.status.is_terminal() {
            self.index_remove(&task.id).await?;
        } else {
            self.index_put(&task.id).await?;
        }
        Ok(version)
    }

    /// 读-改-写状态迁移；版本冲突时重读重试（有界），非法迁移直接拒绝
    async fn update_status(
        &self,
        task_id: &str,
        new_state: TaskState,
        message: Option<&str>,
        ttl: Duration,
    ) -> Result<PersistedTask, StoreError> {
        for attempt in 0..STATUS_UPDATE_ATTEMPTS {
            let mut task = self
                .get_task(task_id)
                .await?
                .ok_or_else(|| StoreError::Missing(task_key(task_id)))?;

            if !task.status.can_transition(new_state) {
                return Err(StoreError::IllegalTransition {
                    from: task.status,
                    to: new_state,
                });
            }

            task.status = new_state;
            task.updated_at = Utc::now();
            if let Some(msg) = message {
                task.history.push(Message::system(msg));
            }

            match self.put_task(&task, ttl).await {
                Ok(version) => {
                    task.version = version;
                    return Ok(task);
                }
                Err(StoreError::VersionConflict(key)) if attempt + 1 < STATUS_UPDATE_ATTEMPTS => {
                    tracing::debug!(%key, attempt, "Status update hit version conflict, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::VersionConflict(task_key(task_id)))
    }

    async fn put_notification(
        &self,
        task_id: &str,
        config: &TaskNotificationConfig,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = notification_key(task_id, &config.id);
        let doc = serde_json::to_string(config)?;
        // 通知配置整体覆盖即可：先读版本再条件写
        let expected = self.read_doc(&key).await?.map(|v| v.version).unwrap_or(0);
        self.write_doc(&key, &doc, expected, ttl).await?;
        Ok(())
    }

    async fn notifications(&self, task_id: &str) -> Result<Vec<TaskNotificationConfig>, StoreError> {
        let prefix = format!("task:{}:notification:", task_id);
        let mut configs = Vec::new();
        for key in self.keys_with_prefix(&prefix).await? {
            if let Some(versioned) = self.read_doc(&key).await? {
                configs.push(serde_json::from_str(&versioned.doc)?);
            }
        }
        Ok(configs)
    }
}
