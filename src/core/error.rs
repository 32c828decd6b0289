//! 编排错误类型
//!
//! (b)-(d) 类错误在组件内就地恢复、转为结构化数据继续流转；
//! 只有持久层不可用会让单个请求失败到调用方。

use thiserror::Error;

/// 编排管线错误（路由、Agent 调用、持久化）
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// LLM 结构化输出不合法（重试耗尽后降级 fallback，通常不会浮出）
    #[error("Routing output malformed: {0}")]
    RoutingMalformed(String),

    #[error("Agent timed out: {0}")]
    AgentTimeout(String),

    #[error("Agent invocation failed: {0}")]
    AgentInvocationFailed(String),

    /// 任务写入版本冲突，调用方需重读后重试
    #[error("Persistence conflict on key: {0}")]
    PersistenceConflict(String),

    /// 存储不可达：该请求致命，向上浮出
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Host is shutting down")]
    ShuttingDown,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<crate::store::StoreError> for OrchestrationError {
    fn from(e: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match e {
            StoreError::VersionConflict(key) => Self::PersistenceConflict(key),
            other => Self::PersistenceUnavailable(other.to_string()),
        }
    }
}
