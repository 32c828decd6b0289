//! 并发分发执行器
//!
//! 把一条路由决策扇出到主 Agent 与所有附加 Agent：
//! 每个目标一个真实并发任务，等全部完成；单个 Agent 失败不取消兄弟任务；
//! 无法解析的 Agent id 记日志跳过，不算硬失败。

use std::sync::Arc;
use std::time::Duration;

use crate::agents::AgentRegistry;

use super::router::AgentChoiceResult;
use super::state::PipelineState;
use super::wrapper::{AgentExecutorWrapper, AgentResponse};

/// 分发执行器
pub struct AgentDispatchExecutor {
    registry: Arc<AgentRegistry>,
    invoke_timeout: Duration,
}

impl AgentDispatchExecutor {
    pub fn new(registry: Arc<AgentRegistry>, invoke_timeout: Duration) -> Self {
        Self {
            registry,
            invoke_timeout,
        }
    }

    /// 扇出执行；完成顺序不做任何保证（聚合器负责排序）
    pub async fn dispatch(
        &self,
        choice: &AgentChoiceResult,
        state: &Arc<PipelineState>,
    ) -> Vec<AgentResponse> {
        let snapshot = self.registry.snapshot();
        let mut handles = Vec::new();

        for agent_id in choice.agent_ids() {
            let entry = match snapshot.get(agent_id) {
                Some(entry) => entry,
                None => {
                    // 注册表与路由决策不一致：跳过并记录
                    tracing::warn!(
                        request_id = %state.request_id,
                        agent_id,
                        "Routing decision names unresolvable agent, skipping"
                    );
                    continue;
                }
            };

            let wrapper = AgentExecutorWrapper::new(
                Arc::clone(&entry.handle),
                agent_id,
                self.invoke_timeout,
            );
            let instruction = choice.instructions.get(agent_id).cloned();
            let state = Arc::clone(state);
            let agent_id = agent_id.to_string();

            handles.push((
                agent_id,
                tokio::spawn(async move { wrapper.execute(&state, instruction.as_deref()).await }),
            ));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (agent_id, handle) in handles {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::error!(
                        request_id = %state.request_id,
                        agent_id = %agent_id,
                        "Agent task join failed: {}",
                        e
                    );
                    responses.push(AgentResponse::failed(
                        agent_id,
                        format!("Agent task aborted: {}", e),
                        0,
                    ));
                }
            }
        }
        responses
    }
}
