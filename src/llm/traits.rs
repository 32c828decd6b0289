//! Chat 客户端抽象
//!
//! 路由器只依赖「一段应当能解析为 AgentChoiceResult JSON 的文本」，
//! 后端（OpenAI 兼容 / Mock）实现 ChatClient::complete。

use async_trait::async_trait;
use thiserror::Error;

use crate::context::Message;

/// Chat 调用错误
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Request timed out")]
    Timeout,

    /// 响应结构异常（无 choices、空 content 等）
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Chat 客户端 trait：非流式完成
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, ChatError>;
}
