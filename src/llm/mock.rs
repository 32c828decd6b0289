//! Mock Chat 客户端（用于测试与离线运行，无需 API）

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context::Message;
use crate::llm::{ChatClient, ChatError};

/// Mock 客户端：总是产出指向固定 Agent 的路由 JSON
#[derive(Debug)]
pub struct MockChatClient {
    agent_id: String,
}

impl MockChatClient {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new("general-agent")
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, ChatError> {
        Ok(format!(
            r#"{{"primaryAgentId": "{}", "additionalAgentIds": [], "confidence": 1.0, "reasoning": "mock routing"}}"#,
            self.agent_id
        ))
    }
}

/// 脚本化客户端：按入队顺序逐条吐出预设响应，耗尽后报错
///
/// 供路由重试 / 降级路径的测试使用。
#[derive(Debug, Default)]
pub struct ScriptedChatClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedChatClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, ChatError> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ChatError::Api("Scripted responses exhausted".to_string()))
    }
}
