//! 任务感知的宿主服务
//!
//! 请求生命周期：解析 taskId/conversationId → 水合任务与上下文 →
//! 路由 → 分发 → 聚合 → 持久化（显式 await，绝无 fire-and-forget）→ 返回。
//! 关闭时：停止接收新请求，等进行中的管线完成，把未落盘的状态刷出。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::context::{Message, OrchestrationContextManager};
use crate::core::{OrchestrationError, ShutdownManager};
use crate::orchestration::{
    AgentDispatchExecutor, AggregationResult, PipelineState, ResultAggregatorExecutor,
    RouterExecutor,
};
use crate::store::{task_key, PersistedTask, StoreError, TaskState, TaskStore};

/// 任务持久化的 CAS 重试上限
const PERSIST_ATTEMPTS: u32 = 3;

/// 一次入站请求
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub text: String,
    /// 未提供时新建会话
    pub conversation_id: Option<String>,
    /// 未提供时新建任务
    pub task_id: Option<String>,
}

impl HostRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            conversation_id: None,
            task_id: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// 一次请求的结果
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub message: String,
    pub conversation_id: String,
    pub task_id: String,
    pub task_status: TaskState,
    /// 澄清轮次没有聚合遥测
    pub aggregation: Option<AggregationResult>,
}

/// 宿主服务
pub struct TaskAwareHostService {
    router: RouterExecutor,
    dispatcher: AgentDispatchExecutor,
    aggregator: ResultAggregatorExecutor,
    contexts: Arc<OrchestrationContextManager>,
    store: Arc<dyn TaskStore>,
    shutdown: Arc<ShutdownManager>,
    task_ttl: Duration,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// 进行中请求的计数守卫
struct InFlightGuard<'a> {
    host: &'a TaskAwareHostService,
}

impl<'a> InFlightGuard<'a> {
    fn new(host: &'a TaskAwareHostService) -> Self {
        host.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { host }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.host.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.host.drained.notify_waiters();
        }
    }
}

impl TaskAwareHostService {
    pub fn new(
        router: RouterExecutor,
        dispatcher: AgentDispatchExecutor,
        aggregator: ResultAggregatorExecutor,
        contexts: Arc<OrchestrationContextManager>,
        store: Arc<dyn TaskStore>,
        shutdown: Arc<ShutdownManager>,
        task_ttl: Duration,
    ) -> Self {
        Self {
            router,
            dispatcher,
            aggregator,
            contexts,
            store,
            shutdown,
            task_ttl,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// 处理一条请求；只有持久层不可用会返回 Err
    pub async fn handle(&self, request: HostRequest) -> Result<HostResponse, OrchestrationError> {
        if self.shutdown.is_shutdown() {
            return Err(OrchestrationError::ShuttingDown);
        }
        let _in_flight = InFlightGuard::new(self);

        let conversation_id = request
            .conversation_id
            .unwrap_or_else(|| format!("conv_{}", uuid::Uuid::new_v4()));

        // 同一会话的并发请求串行化
        let _conversation_guard = self.contexts.acquire(&conversation_id).await;

        let context = self.contexts.get_or_create(&conversation_id).await?;
        let mut task = self.hydrate_task(request.task_id, &conversation_id).await?;

        task.status = TaskState::Working;
        task.history.push(Message::user(request.text.as_str()));
        task.updated_at = chrono::Utc::now();
        // 进入 Working 先落盘一次：另一台宿主恢复同一任务时靠版本冲突挡开
        task = self.persist_task(task).await?;

        let state = Arc::new(PipelineState::new(
            task.id.as_str(),
            request.text.as_str(),
            context,
            self.shutdown.token().child_token(),
        ));
        tracing::info!(
            request_id = %state.request_id,
            task_id = %task.id,
            conversation_id = %conversation_id,
            "Handling request"
        );

        let choice = self
            .router
            .route(&state.request_id, &request.text, &*state.context.lock().await)
            .await;

        if self.router.is_clarification(&choice) {
            return self.finish_clarification(state, task, choice.reasoning).await;
        }

        let responses = self.dispatcher.dispatch(&choice, &state).await;
        let aggregation = self.aggregator.aggregate(&state.request_id, &responses);

        let status = if aggregation.successful_agent_ids.is_empty() {
            TaskState::Failed
        } else {
            TaskState::Completed
        };

        task.status = status;
        task.history.push(Message::assistant(aggregation.final_message.as_str()));
        task.updated_at = chrono::Utc::now();
        let task = self.persist_task(task).await?;

        // 分发已 join 所有子任务，此处拿到的是最终上下文
        let mut context = state.context.lock().await.clone();
        context.push_history(Message::user(request.text.as_str()));
        context.push_history(Message::assistant(aggregation.final_message.as_str()));
        self.contexts.commit(context).await?;

        Ok(HostResponse {
            message: aggregation.final_message.clone(),
            conversation_id,
            task_id: task.id,
            task_status: status,
            aggregation: Some(aggregation),
        })
    }

    /// 澄清轮次：不分发，任务转 InputRequired，把问题返回给用户
    async fn finish_clarification(
        &self,
        state: Arc<PipelineState>,
        mut task: PersistedTask,
        reasoning: String,
    ) -> Result<HostResponse, OrchestrationError> {
        let message = format!(
            "I'm not sure which assistant should handle that ({}). Could you rephrase or add detail?",
            reasoning
        );

        task.status = TaskState::InputRequired;
        task.history.push(Message::assistant(message.as_str()));
        task.updated_at = chrono::Utc::now();
        let task = self.persist_task(task).await?;

        let mut context = state.context.lock().await.clone();
        let conversation_id = context.conversation_id.clone();
        context.push_history(Message::user(state.user_message.as_str()));
        context.push_history(Message::assistant(message.as_str()));
        self.contexts.commit(context).await?;

        Ok(HostResponse {
            message,
            conversation_id,
            task_id: task.id,
            task_status: TaskState::InputRequired,
            aggregation: None,
        })
    }

    /// 水合任务：miss 即新建；命中终态任务时换新任务 id 继续本会话
    async fn hydrate_task(
        &self,
        task_id: Option<String>,
        conversation_id: &str,
    ) -> Result<PersistedTask, OrchestrationError> {
        let task_id = match task_id {
            Some(id) => id,
            None => return Ok(PersistedTask::new(format!("task_{}", uuid::Uuid::new_v4()), conversation_id)),
        };

        match self.store.get_task(&task_id).await? {
            Some(task) if task.status.is_terminal() => {
                tracing::debug!(%task_id, "Stored task is terminal, starting a fresh task");
                Ok(PersistedTask::new(
                    format!("task_{}", uuid::Uuid::new_v4()),
                    conversation_id,
                ))
            }
            Some(task) => Ok(task),
            None => Ok(PersistedTask::new(task_id, conversation_id)),
        }
    }

    /// 条件写任务；冲突时重读最新版本后以本请求状态覆盖重试（有界）
    async fn persist_task(&self, mut task: PersistedTask) -> Result<PersistedTask, OrchestrationError> {
        for attempt in 0..PERSIST_ATTEMPTS {
            match self.store.put_task(&task, self.task_ttl).await {
                Ok(version) => {
                    task.version = version;
                    return Ok(task);
                }
                Err(StoreError::VersionConflict(_)) if attempt + 1 < PERSIST_ATTEMPTS => {
                    let latest = self.store.get_task(&task.id).await?;
                    task.version = latest.map(|l| l.version).unwrap_or(0);
                    tracing::debug!(
                        task_id = %task.id,
                        attempt,
                        "Task persist conflict, retrying at store version {}",
                        task.version
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestrationError::PersistenceConflict(task_key(&task.id)))
    }

    /// 优雅关闭：停止接收新请求（handle 先检查 token），
    /// 等进行中的管线结束，然后把缓存中的会话上下文刷到存储
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        if let Err(e) = self.contexts.flush_all().await {
            tracing::warn!("Context flush on shutdown failed: {}", e);
        }
        tracing::info!("Host drained, all in-flight pipelines finished");
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }
}
