//! 编排管线端到端测试

use std::sync::Arc;
use std::time::Duration;

use lucia::agents::{
    Agent, AgentDescriptor, AgentEntry, AgentRegistry, AgentSnapshot, FailingAgent, ScriptedAgent,
};
use lucia::context::OrchestrationContextManager;
use lucia::core::ShutdownManager;
use lucia::host::{HostRequest, TaskAwareHostService};
use lucia::llm::ScriptedChatClient;
use lucia::orchestration::{
    AgentDispatchExecutor, ResultAggregatorExecutor, RouterConfig, RouterExecutor,
};
use lucia::store::{InMemoryTaskStore, SqliteTaskStore, TaskState, TaskStore};

fn entry(id: &str, handle: Arc<dyn Agent>) -> AgentEntry {
    AgentEntry {
        descriptor: AgentDescriptor::local(id, format!("{} domain handler", id)),
        handle,
    }
}

fn router_config() -> RouterConfig {
    RouterConfig {
        confidence_threshold: 0.55,
        max_attempts: 2,
        fallback_agent_id: "general-agent".to_string(),
        clarification_agent_id: "clarification-agent".to_string(),
    }
}

fn build_host(
    chat_responses: Vec<&str>,
    entries: Vec<AgentEntry>,
    store: Arc<dyn TaskStore>,
) -> TaskAwareHostService {
    let registry = Arc::new(AgentRegistry::new(AgentSnapshot::new(entries)));
    TaskAwareHostService::new(
        RouterExecutor::new(
            Arc::new(ScriptedChatClient::new(chat_responses)),
            Arc::clone(&registry),
            router_config(),
        ),
        AgentDispatchExecutor::new(Arc::clone(&registry), Duration::from_secs(5)),
        ResultAggregatorExecutor::new(vec![
            "light-agent".to_string(),
            "climate-agent".to_string(),
            "music-agent".to_string(),
        ]),
        Arc::new(OrchestrationContextManager::new(
            Arc::clone(&store),
            40,
            Duration::from_secs(3600),
        )),
        store,
        Arc::new(ShutdownManager::new()),
        Duration::from_secs(86400),
    )
}

// 场景 A：单域请求只分发一个 Agent，回复就是该 Agent 的内容
#[tokio::test]
async fn test_single_domain_request() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let host = build_host(
        vec![r#"{"primaryAgentId": "light-agent", "confidence": 0.92, "reasoning": "lighting request"}"#],
        vec![
            entry("light-agent", Arc::new(ScriptedAgent::new("light-agent", "Kitchen lights are on."))),
            // 若被错误分发，失败子句会污染回复
            entry("music-agent", Arc::new(FailingAgent::new("music-agent", "must not be dispatched"))),
        ],
        store,
    );

    let response = host
        .handle(HostRequest::new("turn on the kitchen lights"))
        .await
        .unwrap();

    assert_eq!(response.message, "Kitchen lights are on.");
    let aggregation = response.aggregation.unwrap();
    assert_eq!(aggregation.successful_agent_ids, vec!["light-agent"]);
    assert!(aggregation.failed_agents.is_empty());
}

// 场景 B：跨域请求并行分发，回复同时包含两个确认、无失败子句
#[tokio::test]
async fn test_multi_domain_fan_out() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let host = build_host(
        vec![
            r#"{"primaryAgentId": "light-agent", "additionalAgentIds": ["music-agent"], "confidence": 0.95, "instructions": {"light-agent": "dim to 30%", "music-agent": "play jazz"}}"#,
        ],
        vec![
            entry("light-agent", Arc::new(ScriptedAgent::new("light-agent", "Lights dimmed to 30%."))),
            entry("music-agent", Arc::new(ScriptedAgent::new("music-agent", "Jazz is playing."))),
        ],
        store,
    );

    let response = host
        .handle(HostRequest::new("dim lights to 30% and play jazz"))
        .await
        .unwrap();

    assert!(response.message.contains("Lights dimmed to 30%."));
    assert!(response.message.contains("Jazz is playing."));
    assert!(!response.message.contains("Note:"));
    assert_eq!(response.task_status, TaskState::Completed);

    let aggregation = response.aggregation.unwrap();
    assert_eq!(aggregation.successful_agent_ids.len(), 2);
    assert!(aggregation.failed_agents.is_empty());
}

// 场景 C：部分失败 → 成功内容 + 点名失败子句，failedAgents 恰好一项
#[tokio::test]
async fn test_partial_failure_is_reported() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let host = build_host(
        vec![
            r#"{"primaryAgentId": "light-agent", "additionalAgentIds": ["music-agent"], "confidence": 0.95}"#,
        ],
        vec![
            entry("light-agent", Arc::new(ScriptedAgent::new("light-agent", "Lights dimmed to 30%."))),
            entry("music-agent", Arc::new(FailingAgent::new("music-agent", "player offline"))),
        ],
        store,
    );

    let response = host
        .handle(HostRequest::new("dim lights to 30% and play jazz"))
        .await
        .unwrap();

    assert!(response.message.contains("Lights dimmed to 30%."));
    assert!(response.message.contains("player offline"));

    let aggregation = response.aggregation.unwrap();
    assert_eq!(aggregation.failed_agents.len(), 1);
    assert_eq!(aggregation.failed_agents[0].agent_id, "music-agent");
    assert_eq!(aggregation.successful_agent_ids, vec!["light-agent"]);
}

// 场景 D：连续两次畸形路由输出（MaxAttempts=2）→ 降级到 fallback
#[tokio::test]
async fn test_malformed_routing_degrades_to_fallback() {
    let registry = Arc::new(AgentRegistry::new(AgentSnapshot::new(vec![entry(
        "general-agent",
        Arc::new(ScriptedAgent::new("general-agent", "Let me handle that generally.")),
    )])));
    let router = RouterExecutor::new(
        Arc::new(ScriptedChatClient::new(vec!["{{not json", "also not json"])),
        Arc::clone(&registry),
        router_config(),
    );

    let ctx = lucia::context::OrchestrationContext::new("conv_1");
    let choice = router.route("req_test", "do the thing", &ctx).await;

    assert_eq!(choice.primary_agent_id, "general-agent");
    assert_eq!(choice.confidence, 0.0);
    assert!(choice.reasoning.contains("routing failed after 2 attempts"));
}

// 场景 E：任务落盘后重建存储（模拟重启），历史与状态原样读回
#[tokio::test]
async fn test_task_survives_store_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lucia.db");

    let task_id;
    let conversation_id;
    {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(&db_path).await.unwrap());
        let host = build_host(
            vec![r#"{"primaryAgentId": "light-agent", "confidence": 0.9}"#],
            vec![entry("light-agent", Arc::new(ScriptedAgent::new("light-agent", "Lights on.")))],
            Arc::clone(&store),
        );

        let response = host.handle(HostRequest::new("turn on the lights")).await.unwrap();
        task_id = response.task_id;
        conversation_id = response.conversation_id;
    }

    let reopened = SqliteTaskStore::new(&db_path).await.unwrap();
    let task = reopened.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(task.context_id, conversation_id);
    assert_eq!(task.history.len(), 2);
    assert_eq!(task.history[0].content, "turn on the lights");
    assert_eq!(task.history[1].content, "Lights on.");
}

// 并发属性：同一会话的两个并发请求串行执行，历史无交错丢失
#[tokio::test]
async fn test_same_conversation_requests_serialize() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let host = Arc::new(build_host(
        vec![
            r#"{"primaryAgentId": "light-agent", "confidence": 0.9}"#,
            r#"{"primaryAgentId": "light-agent", "confidence": 0.9}"#,
        ],
        vec![entry("light-agent", Arc::new(ScriptedAgent::new("light-agent", "done")))],
        Arc::clone(&store),
    ));

    let first = host.handle(HostRequest::new("lights on")).await.unwrap();
    let conversation = first.conversation_id.clone();

    let a = {
        let host = Arc::clone(&host);
        let conversation = conversation.clone();
        tokio::spawn(async move {
            host.handle(HostRequest::new("dim them").with_conversation(conversation)).await
        })
    };
    a.await.unwrap().unwrap();

    let doc = store
        .read_doc(&lucia::store::context_key(&conversation))
        .await
        .unwrap()
        .unwrap();
    let ctx: lucia::context::OrchestrationContext = serde_json::from_str(&doc.doc).unwrap();
    // 两轮对话 = 4 条历史（user/assistant 各两条）
    assert_eq!(ctx.history.len(), 4);
}
