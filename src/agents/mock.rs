//! Mock Agent（用于测试与离线运行，无需真实设备技能）

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::ConversationThread;

use super::Agent;

/// 回显 Agent：把用户消息原样回显
pub struct EchoAgent {
    id: String,
}

impl EchoAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        message: &str,
        _thread: &ConversationThread,
        _cancel: CancellationToken,
    ) -> Result<String, String> {
        Ok(format!("Echo from {}: {}", self.id, message))
    }
}

/// 固定回复 Agent
pub struct ScriptedAgent {
    id: String,
    reply: String,
}

impl ScriptedAgent {
    pub fn new(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _message: &str,
        _thread: &ConversationThread,
        _cancel: CancellationToken,
    ) -> Result<String, String> {
        Ok(self.reply.clone())
    }
}

/// 总是失败的 Agent
pub struct FailingAgent {
    id: String,
    error: String,
}

impl FailingAgent {
    pub fn new(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Agent for FailingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _message: &str,
        _thread: &ConversationThread,
        _cancel: CancellationToken,
    ) -> Result<String, String> {
        Err(self.error.clone())
    }
}

/// 延迟 Agent：睡够 delay 才回复（超时 / 取消路径的测试用）
pub struct SlowAgent {
    id: String,
    delay: Duration,
    reply: String,
}

impl SlowAgent {
    pub fn new(id: impl Into<String>, delay: Duration, reply: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delay,
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Agent for SlowAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        _message: &str,
        _thread: &ConversationThread,
        cancel: CancellationToken,
    ) -> Result<String, String> {
        tokio::select! {
            _ = cancel.cancelled() => Err("Invocation canceled".to_string()),
            _ = tokio::time::sleep(self.delay) => Ok(self.reply.clone()),
        }
    }
}
