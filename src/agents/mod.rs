//! Agent 层：调用契约、描述符、注册表与远端对端
//!
//! 领域技能本身（灯光 / 音乐 / 空调及其下游设备 API）在本 crate 范围之外，
//! 这里只定义统一的调用契约与目录管理。

pub mod mock;
pub mod registry;
pub mod remote;

pub use mock::{EchoAgent, FailingAgent, ScriptedAgent, SlowAgent};
pub use registry::{AgentEntry, AgentRegistry, AgentSnapshot};
pub use remote::RemoteAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::ConversationThread;

/// Agent 端点：进程内实现或 agent-card 地址指向的远端对端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEndpoint {
    Local,
    Remote { url: String },
}

/// Agent 描述符：注册表持有的只读目录项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub endpoint: AgentEndpoint,
}

impl AgentDescriptor {
    pub fn local(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            capabilities: Vec::new(),
            endpoint: AgentEndpoint::Local,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Agent 调用契约
///
/// 线程是该 (conversation, agent) 的私有对话状态，由 Wrapper 负责读写；
/// 错误以 String 返回，Wrapper 统一归一化为失败响应，绝不向上抛。
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn invoke(
        &self,
        message: &str,
        thread: &ConversationThread,
        cancel: CancellationToken,
    ) -> Result<String, String>;
}
