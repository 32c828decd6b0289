//! LLM 层：Chat 客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockChatClient, ScriptedChatClient};
pub use openai::{OpenAiChatClient, TokenUsage};
pub use traits::{ChatClient, ChatError};

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

/// 根据配置与环境变量选择 Chat 后端（OpenAI 兼容 / Mock）
pub fn create_chat_client_from_config(cfg: &AppConfig) -> Arc<dyn ChatClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();

    if provider == "openai" && has_key {
        tracing::info!("Using OpenAI-compatible chat backend ({})", cfg.llm.model);
        Arc::new(
            OpenAiChatClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(Duration::from_secs(cfg.llm.request_timeout_secs)),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock chat backend");
        Arc::new(MockChatClient::default())
    }
}
