//! 会话上下文：消息、线程与编排上下文
//!
//! OrchestrationContext 按 conversation_id 聚合共享历史与每个 Agent 的私有线程；
//! 同一 (conversation_id, agent_id) 至多一条线程，线程不跨 Agent 共享。

pub mod manager;

pub use manager::OrchestrationContextManager;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 每个 (conversation_id, agent_id) 独占的对话线程
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationThread {
    pub conversation_id: String,
    pub agent_id: String,
    pub messages: Vec<Message>,
}

impl ConversationThread {
    pub fn new(conversation_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            agent_id: agent_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }
}

/// 单个会话的编排上下文
///
/// 由 Manager 创建、Wrapper 与 Manager 修改、空闲 TTL 清扫销毁。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub conversation_id: String,
    /// agent_id -> 线程；同一对至多一条
    #[serde(default)]
    pub threads: HashMap<String, ConversationThread>,
    /// 会话级共享历史（user/assistant 轮次）
    #[serde(default)]
    pub history: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    /// 持久化文档版本（读出时填充，不随文档序列化）
    #[serde(skip)]
    pub version: u64,
}

impl OrchestrationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            threads: HashMap::new(),
            history: Vec::new(),
            last_activity: Utc::now(),
            version: 0,
        }
    }

    /// 解析指定 Agent 的线程副本；conversation_id 不匹配的旧线程被丢弃、重新开始。
    /// 调用失败时上下文中的原线程保持原样（只有成功才 put_thread 写回）。
    pub fn resolve_thread(&mut self, agent_id: &str) -> ConversationThread {
        match self.threads.get(agent_id) {
            Some(thread) if thread.conversation_id == self.conversation_id => thread.clone(),
            Some(stale) => {
                tracing::warn!(
                    agent_id,
                    stale_conversation = %stale.conversation_id,
                    conversation = %self.conversation_id,
                    "Discarding thread from another conversation"
                );
                self.threads.remove(agent_id);
                ConversationThread::new(&self.conversation_id, agent_id)
            }
            None => ConversationThread::new(&self.conversation_id, agent_id),
        }
    }

    /// 写回线程（仅接受本会话的线程）
    pub fn put_thread(&mut self, thread: ConversationThread) {
        if thread.conversation_id == self.conversation_id {
            self.threads.insert(thread.agent_id.clone(), thread);
        }
    }

    pub fn push_history(&mut self, msg: Message) {
        self.history.push(msg);
    }

    /// 超出 max_messages 时丢弃最旧的消息，保留最近部分
    pub fn prune(&mut self, max_messages: usize) {
        if self.history.len() > max_messages {
            let excess = self.history.len() - max_messages;
            self.history.drain(..excess);
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_thread_discards_mismatched_conversation() {
        let mut ctx = OrchestrationContext::new("conv_a");
        let mut stale = ConversationThread::new("conv_b", "light-agent");
        stale.push(Message::user("old"));
        ctx.threads.insert("light-agent".to_string(), stale);

        let thread = ctx.resolve_thread("light-agent");
        assert_eq!(thread.conversation_id, "conv_a");
        assert!(thread.messages.is_empty());
        assert!(ctx.threads.is_empty());
    }

    #[test]
    fn test_resolve_thread_leaves_original_in_place() {
        let mut ctx = OrchestrationContext::new("conv_a");
        let mut thread = ConversationThread::new("conv_a", "light-agent");
        thread.push(Message::user("earlier turn"));
        ctx.put_thread(thread);

        let copy = ctx.resolve_thread("light-agent");
        assert_eq!(copy.messages.len(), 1);
        assert_eq!(ctx.threads["light-agent"].messages.len(), 1);
    }

    #[test]
    fn test_prune_drops_oldest() {
        let mut ctx = OrchestrationContext::new("conv_a");
        for i in 0..10 {
            ctx.push_history(Message::user(format!("msg {}", i)));
        }
        ctx.prune(4);
        assert_eq!(ctx.history.len(), 4);
        assert_eq!(ctx.history[0].content, "msg 6");
    }

    #[test]
    fn test_one_thread_per_agent() {
        let mut ctx = OrchestrationContext::new("conv_a");
        ctx.put_thread(ConversationThread::new("conv_a", "light-agent"));
        ctx.put_thread(ConversationThread::new("conv_a", "light-agent"));
        assert_eq!(ctx.threads.len(), 1);
    }
}
