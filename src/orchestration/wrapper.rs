//! 单 Agent 执行包装
//!
//! 恰好包装一个目标 Agent：解析线程归属、限时调用、错误归一化。
//! 底层 Agent 的任何错误都转成失败响应，绝不穿透到管线之外；
//! 成功时把变更后的线程写回共享管线状态，供持久化步骤观察。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::agents::Agent;
use crate::context::Message;

use super::state::PipelineState;

/// 一次 Agent 调用的结果（每次调用一份，不可变）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub agent_id: String,
    pub content: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
}

impl AgentResponse {
    pub fn ok(agent_id: impl Into<String>, content: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            content: content.into(),
            success: true,
            error_message: None,
            execution_time_ms: elapsed_ms,
        }
    }

    pub fn failed(agent_id: impl Into<String>, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            content: String::new(),
            success: false,
            error_message: Some(error.into()),
            execution_time_ms: elapsed_ms,
        }
    }
}

/// 单 Agent 执行包装器
pub struct AgentExecutorWrapper {
    agent: Arc<dyn Agent>,
    agent_id: String,
    invoke_timeout: Duration,
}

impl AgentExecutorWrapper {
    pub fn new(agent: Arc<dyn Agent>, agent_id: impl Into<String>, invoke_timeout: Duration) -> Self {
        Self {
            agent,
            agent_id: agent_id.into(),
            invoke_timeout,
        }
    }

    /// 执行一次调用；任何结局都归一化为 AgentResponse
    pub async fn execute(&self, state: &PipelineState, instruction: Option<&str>) -> AgentResponse {
        let mut thread = state.context.lock().await.resolve_thread(&self.agent_id);

        let message = match instruction {
            Some(extra) => format!("{}\n\nInstruction: {}", state.user_message, extra),
            None => state.user_message.clone(),
        };
        thread.push(Message::user(message.as_str()));

        // 超时只取消本 Agent 的调用；请求级取消（如 shutdown）向所有调用传播
        let invoke_token = state.cancel.child_token();
        let started = Instant::now();

        let outcome = tokio::select! {
            _ = state.cancel.cancelled() => Err("Invocation canceled".to_string()),
            timed = tokio::time::timeout(
                self.invoke_timeout,
                self.agent.invoke(&message, &thread, invoke_token.clone()),
            ) => match timed {
                Ok(result) => result,
                Err(_) => {
                    invoke_token.cancel();
                    Err(format!(
                        "Agent timed out after {}s",
                        self.invoke_timeout.as_secs()
                    ))
                }
            },
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(content) => {
                thread.push(Message::assistant(content.as_str()));
                state.context.lock().await.put_thread(thread);
                tracing::debug!(
                    request_id = %state.request_id,
                    agent_id = %self.agent_id,
                    elapsed_ms,
                    "Agent invocation succeeded"
                );
                AgentResponse::ok(self.agent_id.as_str(), content, elapsed_ms)
            }
            Err(error) => {
                tracing::warn!(
                    request_id = %state.request_id,
                    agent_id = %self.agent_id,
                    elapsed_ms,
                    "Agent invocation failed: {}",
                    error
                );
                AgentResponse::failed(self.agent_id.as_str(), error, elapsed_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{FailingAgent, ScriptedAgent, SlowAgent};
    use crate::context::OrchestrationContext;
    use tokio_util::sync::CancellationToken;

    fn state() -> PipelineState {
        PipelineState::new(
            "task_1",
            "turn on the lights",
            OrchestrationContext::new("conv_1"),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_success_writes_thread_back() {
        let wrapper = AgentExecutorWrapper::new(
            Arc::new(ScriptedAgent::new("light-agent", "lights are on")),
            "light-agent",
            Duration::from_secs(5),
        );
        let state = state();

        let response = wrapper.execute(&state, None).await;
        assert!(response.success);
        assert_eq!(response.content, "lights are on");

        let ctx = state.into_context();
        let thread = &ctx.threads["light-agent"];
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].content, "lights are on");
    }

    #[tokio::test]
    async fn test_failure_is_captured_not_propagated() {
        let wrapper = AgentExecutorWrapper::new(
            Arc::new(FailingAgent::new("music-agent", "player offline")),
            "music-agent",
            Duration::from_secs(5),
        );
        let state = state();

        let response = wrapper.execute(&state, None).await;
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("player offline"));

        // 失败调用不写回线程
        let ctx = state.into_context();
        assert!(ctx.threads.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_yields_failed_response() {
        let wrapper = AgentExecutorWrapper::new(
            Arc::new(SlowAgent::new(
                "climate-agent",
                Duration::from_secs(60),
                "too late",
            )),
            "climate-agent",
            Duration::from_millis(50),
        );
        let state = state();

        let response = wrapper.execute(&state, None).await;
        assert!(!response.success);
        assert!(response.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_request_cancellation_stops_invocation() {
        let wrapper = AgentExecutorWrapper::new(
            Arc::new(SlowAgent::new(
                "climate-agent",
                Duration::from_secs(60),
                "too late",
            )),
            "climate-agent",
            Duration::from_secs(120),
        );
        let state = state();
        state.cancel.cancel();

        let response = wrapper.execute(&state, None).await;
        assert!(!response.success);
        assert!(response.error_message.unwrap().contains("canceled"));
    }

    #[tokio::test]
    async fn test_instruction_appended_to_message() {
        let wrapper = AgentExecutorWrapper::new(
            Arc::new(ScriptedAgent::new("light-agent", "dimmed")),
            "light-agent",
            Duration::from_secs(5),
        );
        let state = state();

        wrapper.execute(&state, Some("dim to 30%")).await;

        let ctx = state.into_context();
        let thread = &ctx.threads["light-agent"];
        assert!(thread.messages[0].content.contains("dim to 30%"));
    }
}
