//! 会话上下文生命周期管理
//!
//! 内存缓存 + TaskStore 持久化（`context:{conversationId}` 文档）。
//! 同一 conversation_id 的并发请求通过 per-key 异步锁串行化；
//! 后台清扫任务移除空闲超时的会话，线程随之不可恢复地丢弃。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::store::{context_key, StoreError, TaskStore};

use super::OrchestrationContext;

/// 上下文提交的 CAS 重试上限
const COMMIT_ATTEMPTS: u32 = 3;

/// 会话上下文管理器
pub struct OrchestrationContextManager {
    store: Arc<dyn TaskStore>,
    /// 活跃会话缓存（conversation_id -> context）
    contexts: RwLock<HashMap<String, OrchestrationContext>>,
    /// per-conversation 串行化锁
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    max_history_messages: usize,
    idle_ttl: Duration,
}

impl OrchestrationContextManager {
    pub fn new(store: Arc<dyn TaskStore>, max_history_messages: usize, idle_ttl: Duration) -> Self {
        Self {
            store,
            contexts: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            max_history_messages,
            idle_ttl,
        }
    }

    pub fn max_history_messages(&self) -> usize {
        self.max_history_messages
    }

    /// 获取会话级串行锁；持有期间同一 conversation_id 的其他请求排队等待
    pub async fn acquire(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self.guards.lock().await;
            guards
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        guard.lock_owned().await
    }

    /// 获取或创建会话上下文：缓存命中 > 存储水合 > 新建
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<OrchestrationContext, StoreError> {
        if let Some(ctx) = self.contexts.read().await.get(conversation_id) {
            return Ok(ctx.clone());
        }

        let key = context_key(conversation_id);
        if let Some(versioned) = self.store.read_doc(&key).await? {
            let mut ctx: OrchestrationContext = serde_json::from_str(&versioned.doc)?;
            ctx.version = versioned.version;
            tracing::debug!(conversation_id, version = ctx.version, "Hydrated context from store");
            self.contexts
                .write()
                .await
                .insert(conversation_id.to_string(), ctx.clone());
            return Ok(ctx);
        }

        let ctx = OrchestrationContext::new(conversation_id);
        self.contexts
            .write()
            .await
            .insert(conversation_id.to_string(), ctx.clone());
        Ok(ctx)
    }

    /// 更新活跃时间（不触发持久化）
    pub async fn touch(&self, conversation_id: &str) {
        if let Some(ctx) = self.contexts.write().await.get_mut(conversation_id) {
            ctx.touch();
        }
    }

    /// 剪枝 + 持久化 + 回写缓存
    ///
    /// 版本冲突说明另一进程动过该文档；重读版本后以本进程状态覆盖重试（有界）。
    pub async fn commit(&self, mut ctx: OrchestrationContext) -> Result<(), StoreError> {
        ctx.prune(self.max_history_messages);
        ctx.touch();

        let key = context_key(&ctx.conversation_id);
        let doc = serde_json::to_string(&ctx)?;

        for attempt in 0..COMMIT_ATTEMPTS {
            match self.store.write_doc(&key, &doc, ctx.version, self.idle_ttl).await {
                Ok(version) => {
                    ctx.version = version;
                    self.contexts
                        .write()
                        .await
                        .insert(ctx.conversation_id.clone(), ctx);
                    return Ok(());
                }
                Err(StoreError::VersionConflict(_)) if attempt + 1 < COMMIT_ATTEMPTS => {
                    let current = self.store.read_doc(&key).await?;
                    ctx.version = current.map(|v| v.version).unwrap_or(0);
                    tracing::debug!(
                        conversation = %ctx.conversation_id,
                        attempt,
                        "Context commit conflict, retrying at store version {}",
                        ctx.version
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::VersionConflict(key))
    }

    /// 移除会话（缓存 + 存储文档 + 串行锁）；线程不可恢复
    pub async fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.contexts.write().await.remove(conversation_id);
        self.guards.lock().await.remove(conversation_id);
        self.store.remove_doc(&context_key(conversation_id)).await
    }

    /// 清扫空闲超时的会话，返回移除数
    pub async fn sweep_idle(&self) -> usize {
        let idle: Vec<String> = {
            let contexts = self.contexts.read().await;
            contexts
                .iter()
                .filter(|(_, ctx)| ctx.idle_for().to_std().unwrap_or_default() > self.idle_ttl)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut removed = 0;
        for conversation_id in idle {
            match self.remove(&conversation_id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(%conversation_id, "Failed to remove idle context: {}", e)
                }
            }
        }
        removed
    }

    /// 启动后台清扫循环；shutdown token 触发后退出
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.sweep_idle().await;
                        if removed > 0 {
                            tracing::info!("Swept {} idle conversation context(s)", removed);
                        }
                        if let Err(e) = manager.store.sweep_expired().await {
                            tracing::warn!("Expired-document sweep failed: {}", e);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Context sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// 把所有缓存中的会话落盘（优雅关闭时调用）
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let snapshot: Vec<OrchestrationContext> =
            self.contexts.read().await.values().cloned().collect();
        for ctx in snapshot {
            self.commit(ctx).await?;
        }
        Ok(())
    }
}
