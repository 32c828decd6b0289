//! 结果聚合执行器
//!
//! 把一批 AgentResponse 合成一条回复：成功项按配置的优先级排序后拼接，
//! 失败项追加点名子句；全失败也产出连贯消息，绝不返回空串。
//! totalExecutionTimeMs 取各 Agent 用时之和（累计工作量而非墙钟时延）。

use serde::Serialize;

use super::wrapper::AgentResponse;

/// 失败的 Agent 及其错误
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAgent {
    pub agent_id: String,
    pub error: String,
}

/// 聚合结果：最终消息 + 遥测
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub final_message: String,
    pub successful_agent_ids: Vec<String>,
    pub failed_agents: Vec<FailedAgent>,
    pub total_execution_time_ms: u64,
}

/// 聚合执行器
pub struct ResultAggregatorExecutor {
    /// 成功项的输出顺序；未列出的 Agent 按分发顺序排后
    priority: Vec<String>,
}

impl ResultAggregatorExecutor {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    fn priority_rank(&self, agent_id: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == agent_id)
            .unwrap_or(usize::MAX)
    }

    /// 聚合一批响应
    pub fn aggregate(&self, request_id: &str, responses: &[AgentResponse]) -> AggregationResult {
        let total_execution_time_ms = responses.iter().map(|r| r.execution_time_ms).sum();

        let mut successes: Vec<&AgentResponse> = responses.iter().filter(|r| r.success).collect();
        // 稳定排序：优先级表内按表序，其余保持分发顺序
        successes.sort_by_key(|r| self.priority_rank(&r.agent_id));

        let failed_agents: Vec<FailedAgent> = responses
            .iter()
            .filter(|r| !r.success)
            .map(|r| FailedAgent {
                agent_id: r.agent_id.clone(),
                error: r
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
            .collect();

        let successful_agent_ids: Vec<String> =
            successes.iter().map(|r| r.agent_id.clone()).collect();

        let failure_clause = |failed: &[FailedAgent]| {
            failed
                .iter()
                .map(|f| format!("{}: {}", f.agent_id, f.error))
                .collect::<Vec<_>>()
                .join("; ")
        };

        let final_message = if successes.is_empty() {
            if failed_agents.is_empty() {
                "No agent produced a response for this request.".to_string()
            } else {
                format!(
                    "Sorry, I couldn't complete your request. {}.",
                    failure_clause(&failed_agents)
                )
            }
        } else {
            let body = successes
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            if failed_agents.is_empty() {
                body
            } else {
                format!(
                    "{}\n\nNote: part of your request failed — {}.",
                    body,
                    failure_clause(&failed_agents)
                )
            }
        };

        tracing::info!(
            request_id,
            successful = ?successful_agent_ids,
            failed = ?failed_agents.iter().map(|f| f.agent_id.as_str()).collect::<Vec<_>>(),
            total_execution_time_ms,
            "Aggregated agent responses"
        );

        AggregationResult {
            final_message,
            successful_agent_ids,
            failed_agents,
            total_execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ResultAggregatorExecutor {
        ResultAggregatorExecutor::new(vec![
            "light-agent".to_string(),
            "climate-agent".to_string(),
            "music-agent".to_string(),
        ])
    }

    #[test]
    fn test_single_success_passes_through() {
        let result = aggregator().aggregate(
            "req_1",
            &[AgentResponse::ok("light-agent", "Kitchen lights are on.", 120)],
        );
        assert_eq!(result.final_message, "Kitchen lights are on.");
        assert_eq!(result.successful_agent_ids, vec!["light-agent"]);
        assert!(result.failed_agents.is_empty());
    }

    #[test]
    fn test_priority_order_applied() {
        // 分发顺序 music 在前；优先级表要求 light 在前
        let result = aggregator().aggregate(
            "req_1",
            &[
                AgentResponse::ok("music-agent", "Jazz is playing.", 80),
                AgentResponse::ok("light-agent", "Lights dimmed to 30%.", 100),
            ],
        );
        assert_eq!(
            result.final_message,
            "Lights dimmed to 30%.\n\nJazz is playing."
        );
    }

    #[test]
    fn test_unlisted_agents_keep_dispatch_order_after_listed() {
        let result = aggregator().aggregate(
            "req_1",
            &[
                AgentResponse::ok("vacuum-agent", "Vacuum started.", 10),
                AgentResponse::ok("blind-agent", "Blinds closed.", 10),
                AgentResponse::ok("music-agent", "Jazz is playing.", 10),
            ],
        );
        assert_eq!(
            result.final_message,
            "Jazz is playing.\n\nVacuum started.\n\nBlinds closed."
        );
    }

    #[test]
    fn test_partial_failure_appends_clause() {
        let result = aggregator().aggregate(
            "req_1",
            &[
                AgentResponse::ok("light-agent", "Lights dimmed to 30%.", 100),
                AgentResponse::failed("music-agent", "player offline", 40),
            ],
        );
        assert!(result.final_message.starts_with("Lights dimmed to 30%."));
        assert!(result.final_message.contains("music-agent: player offline"));
        assert_eq!(result.failed_agents.len(), 1);
        assert_eq!(result.failed_agents[0].agent_id, "music-agent");
    }

    #[test]
    fn test_all_failed_is_coherent() {
        let result = aggregator().aggregate(
            "req_1",
            &[
                AgentResponse::failed("light-agent", "bulb unreachable", 30),
                AgentResponse::failed("music-agent", "player offline", 40),
            ],
        );
        assert!(!result.final_message.is_empty());
        assert!(result.final_message.contains("light-agent: bulb unreachable"));
        assert!(result.final_message.contains("music-agent: player offline"));
        assert!(result.successful_agent_ids.is_empty());
    }

    #[test]
    fn test_sets_partition_and_sum() {
        let responses = vec![
            AgentResponse::ok("light-agent", "ok", 100),
            AgentResponse::failed("music-agent", "err", 50),
            AgentResponse::ok("climate-agent", "ok", 25),
        ];
        let result = aggregator().aggregate("req_1", &responses);

        assert_eq!(
            result.successful_agent_ids.len() + result.failed_agents.len(),
            responses.len()
        );
        for failed in &result.failed_agents {
            assert!(!result.successful_agent_ids.contains(&failed.agent_id));
        }
        // 总用时是和而不是最大值
        assert_eq!(result.total_execution_time_ms, 175);
    }
}
