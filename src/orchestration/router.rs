//! 路由执行器
//!
//! 一次结构化 LLM 调用产出 AgentChoiceResult：
//! 解析 / 校验失败重试到 MaxAttempts，耗尽后降级到固定 fallback；
//! 置信度低于阈值时不执行，改为指向澄清 Agent 的伪选择。
//! 路由永远返回可用决策，从不向调用方抛错。

use std::collections::HashMap;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentRegistry, AgentSnapshot};
use crate::config::RouterSection;
use crate::context::{Message, OrchestrationContext};
use crate::llm::ChatClient;

/// 路由提示词中带上的最近历史条数
const PROMPT_HISTORY_MESSAGES: usize = 6;

/// 路由决策：主 Agent + 可选的并行附加 Agent
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentChoiceResult {
    /// 处理请求的主 Agent id
    pub primary_agent_id: String,
    /// 需要并行参与的其余 Agent id
    #[serde(default)]
    pub additional_agent_ids: Vec<String>,
    /// 决策置信度，[0,1]
    pub confidence: f32,
    /// 决策依据（或降级 / 澄清的原因）
    #[serde(default)]
    pub reasoning: String,
    /// 每个 Agent 的附加指令（agent id -> instruction）
    #[serde(default)]
    pub instructions: HashMap<String, String>,
}

impl AgentChoiceResult {
    /// 去重后的调度目标（主 Agent 在前，保持出现顺序）
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.primary_agent_id.as_str()];
        for id in &self.additional_agent_ids {
            if !ids.contains(&id.as_str()) {
                ids.push(id.as_str());
            }
        }
        ids
    }
}

/// 路由配置快照（热更新时由调用方重建 RouterExecutor）
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub confidence_threshold: f32,
    pub max_attempts: u32,
    pub fallback_agent_id: String,
    pub clarification_agent_id: String,
}

impl From<&RouterSection> for RouterConfig {
    fn from(section: &RouterSection) -> Self {
        Self {
            confidence_threshold: section.confidence_threshold,
            max_attempts: section.max_attempts.max(1),
            fallback_agent_id: section.fallback_agent_id.clone(),
            clarification_agent_id: section.clarification_agent_id.clone(),
        }
    }
}

/// 路由执行器
pub struct RouterExecutor {
    chat: Arc<dyn ChatClient>,
    registry: Arc<AgentRegistry>,
    config: RouterConfig,
}

impl RouterExecutor {
    pub fn new(chat: Arc<dyn ChatClient>, registry: Arc<AgentRegistry>, config: RouterConfig) -> Self {
        Self {
            chat,
            registry,
            config,
        }
    }

    /// 选择的伪目标是否为澄清 Agent
    pub fn is_clarification(&self, choice: &AgentChoiceResult) -> bool {
        choice.primary_agent_id == self.config.clarification_agent_id
    }

    /// 路由一条用户消息；绝不失败
    pub async fn route(
        &self,
        request_id: &str,
        user_message: &str,
        context: &OrchestrationContext,
    ) -> AgentChoiceResult {
        let snapshot = self.registry.snapshot();
        let messages = self.build_messages(user_message, context, &snapshot);

        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.config.max_attempts {
            match self.chat.complete(&messages).await {
                Ok(text) => match parse_choice(&text, &snapshot) {
                    Ok(choice) => {
                        if choice.confidence < self.config.confidence_threshold {
                            let clarification = self.clarification_choice(choice);
                            tracing::info!(
                                request_id,
                                confidence = clarification.confidence,
                                "Routing below confidence threshold, asking for clarification"
                            );
                            return clarification;
                        }
                        tracing::info!(
                            request_id,
                            primary = %choice.primary_agent_id,
                            additional = ?choice.additional_agent_ids,
                            confidence = choice.confidence,
                            "Routing decision"
                        );
                        return choice;
                    }
                    Err(e) => {
                        tracing::warn!(request_id, attempt, "Malformed routing output: {}", e);
                        last_error = e;
                    }
                },
                Err(e) => {
                    tracing::warn!(request_id, attempt, "Routing chat call failed: {}", e);
                    last_error = e.to_string();
                }
            }
        }

        tracing::warn!(
            request_id,
            fallback = %self.config.fallback_agent_id,
            "Routing degraded to fallback: {}",
            last_error
        );
        AgentChoiceResult {
            primary_agent_id: self.config.fallback_agent_id.clone(),
            additional_agent_ids: Vec::new(),
            confidence: 0.0,
            reasoning: format!(
                "routing failed after {} attempts: {}",
                self.config.max_attempts, last_error
            ),
            instructions: HashMap::new(),
        }
    }

    fn clarification_choice(&self, low: AgentChoiceResult) -> AgentChoiceResult {
        let candidates = low.agent_ids().join(", ");
        AgentChoiceResult {
            primary_agent_id: self.config.clarification_agent_id.clone(),
            additional_agent_ids: Vec::new(),
            confidence: low.confidence,
            reasoning: format!(
                "confidence {:.2} below threshold {:.2}; top candidates: {}",
                low.confidence, self.config.confidence_threshold, candidates
            ),
            instructions: HashMap::new(),
        }
    }

    fn build_messages(
        &self,
        user_message: &str,
        context: &OrchestrationContext,
        snapshot: &AgentSnapshot,
    ) -> Vec<Message> {
        let agent_list = snapshot
            .descriptors()
            .map(|d| {
                format!(
                    "ID: {}\nDescription: {}\nCapabilities: {}",
                    d.id,
                    d.description,
                    if d.capabilities.is_empty() {
                        "-".to_string()
                    } else {
                        d.capabilities.join(", ")
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let system = format!(
            r#"You route smart-home requests to specialized agents.

AVAILABLE AGENTS:
{}

Pick the single best primaryAgentId for the latest user request. If the request
spans several domains, list the other involved agents in additionalAgentIds and
put a short per-agent instruction into instructions. Set confidence between 0
and 1 for how certain you are.

Respond with ONLY a JSON object matching this schema (no prose, no markdown):
{}"#,
            agent_list,
            choice_schema_json()
        );

        let mut messages = vec![Message::system(system)];

        let start = context.history.len().saturating_sub(PROMPT_HISTORY_MESSAGES);
        for msg in &context.history[start..] {
            messages.push(msg.clone());
        }
        messages.push(Message::user(user_message));
        messages
    }
}

/// AgentChoiceResult 的 JSON Schema 字符串，拼入 system prompt
pub fn choice_schema_json() -> String {
    let schema = schema_for!(AgentChoiceResult);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 从 LLM 输出解析并校验决策
///
/// 容忍 markdown 代码栅栏；未注册的主 Agent 等同解析失败，
/// 未注册的附加 Agent 丢弃并告警；confidence 截断到 [0,1]。
fn parse_choice(text: &str, snapshot: &AgentSnapshot) -> Result<AgentChoiceResult, String> {
    let json = extract_json_object(text).ok_or_else(|| "no JSON object in output".to_string())?;

    let mut choice: AgentChoiceResult =
        serde_json::from_str(json).map_err(|e| format!("schema mismatch: {}", e))?;

    if !choice.confidence.is_finite() {
        choice.confidence = 0.0;
    }
    choice.confidence = choice.confidence.clamp(0.0, 1.0);

    if !snapshot.contains(&choice.primary_agent_id) {
        return Err(format!(
            "unknown primary agent id: {}",
            choice.primary_agent_id
        ));
    }

    let mut seen = vec![choice.primary_agent_id.clone()];
    choice.additional_agent_ids.retain(|id| {
        if seen.contains(id) {
            return false;
        }
        if !snapshot.contains(id) {
            tracing::warn!(agent_id = %id, "Dropping unknown additional agent id from routing decision");
            return false;
        }
        seen.push(id.clone());
        true
    });

    Ok(choice)
}

/// 取文本中第一个 '{' 到最后一个 '}' 之间的片段
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
