//! 请求级管线状态
//!
//! 显式的 request_id 贯穿路由 / 分发 / 聚合与日志（并行扇出下不用任何线程本地量）；
//! 共享上下文放在异步互斥量里，分发期间多个 Wrapper 并发写回各自的线程。

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::OrchestrationContext;

/// 单个请求的管线状态
pub struct PipelineState {
    /// 请求关联 id（req_ 前缀），随每条日志输出
    pub request_id: String,
    pub task_id: String,
    pub conversation_id: String,
    pub user_message: String,
    /// 共享会话上下文；Wrapper 取线程 / 写回线程时短暂加锁
    pub context: Mutex<OrchestrationContext>,
    /// 请求级取消令牌（shutdown token 的子 token）
    pub cancel: CancellationToken,
}

impl PipelineState {
    pub fn new(
        task_id: impl Into<String>,
        user_message: impl Into<String>,
        context: OrchestrationContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id: format!("req_{}", uuid::Uuid::new_v4()),
            task_id: task_id.into(),
            conversation_id: context.conversation_id.clone(),
            user_message: user_message.into(),
            context: Mutex::new(context),
            cancel,
        }
    }

    /// 管线结束后取回上下文（供持久化）
    pub fn into_context(self) -> OrchestrationContext {
        self.context.into_inner()
    }
}
