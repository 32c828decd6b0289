//! lucia 守护进程入口
//!
//! 读取配置、装配编排管线，然后逐行消费标准输入作为用户请求；
//! Ctrl+C / SIGTERM 触发优雅关闭：等在途请求完成、刷出会话状态。

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use lucia::agents::{AgentDescriptor, AgentEntry, AgentRegistry, AgentSnapshot, EchoAgent};
use lucia::config::{load_config, AppConfig};
use lucia::context::OrchestrationContextManager;
use lucia::core::{ShutdownManager, ShutdownReason};
use lucia::host::{HostRequest, TaskAwareHostService};
use lucia::llm::create_chat_client_from_config;
use lucia::orchestration::{
    AgentDispatchExecutor, ResultAggregatorExecutor, RouterConfig, RouterExecutor,
};
use lucia::store::{InMemoryTaskStore, SqliteTaskStore, TaskStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut sqlite_store: Option<Arc<SqliteTaskStore>> = None;
    let store: Arc<dyn TaskStore> = match &cfg.store.db_path {
        Some(path) => {
            tracing::info!("Using SQLite task store: {:?}", path);
            let s = Arc::new(SqliteTaskStore::new(path).await?);
            sqlite_store = Some(Arc::clone(&s));
            s
        }
        None => {
            tracing::info!("Using in-memory task store");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    let registry = Arc::new(
        AgentRegistry::new(build_local_snapshot(&cfg)).with_api_key(cfg.agents.api_key.clone()),
    );
    if let Some(repository) = &cfg.agents.repository {
        let http = reqwest::Client::new();
        match registry.refresh_from_catalog(&http, repository).await {
            Ok(count) => tracing::info!("Agent registry refreshed, {} agent(s) available", count),
            Err(e) => tracing::warn!("Agent catalog refresh failed, using local agents: {}", e),
        }
    }

    let chat = create_chat_client_from_config(&cfg);
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let contexts = Arc::new(OrchestrationContextManager::new(
        Arc::clone(&store),
        cfg.app.max_history_messages,
        Duration::from_secs(cfg.context.idle_ttl_secs),
    ));
    let sweeper = contexts.spawn_sweeper(
        Duration::from_secs(cfg.context.sweep_interval_secs),
        shutdown.token(),
    );

    let host = TaskAwareHostService::new(
        RouterExecutor::new(chat, Arc::clone(&registry), RouterConfig::from(&cfg.router)),
        AgentDispatchExecutor::new(
            Arc::clone(&registry),
            Duration::from_secs(cfg.agents.invoke_timeout_secs),
        ),
        ResultAggregatorExecutor::new(cfg.agents.priority.clone()),
        Arc::clone(&contexts),
        Arc::clone(&store),
        Arc::clone(&shutdown),
        Duration::from_secs(cfg.store.task_ttl_secs),
    );

    tracing::info!("lucia ready, reading requests from stdin (one per line)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation_id: Option<String> = None;

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }

                let mut request = HostRequest::new(text);
                if let Some(id) = &conversation_id {
                    request = request.with_conversation(id.clone());
                }

                match host.handle(request).await {
                    Ok(response) => {
                        conversation_id = Some(response.conversation_id.clone());
                        println!("{}", response.message);
                    }
                    Err(e) => {
                        tracing::error!("Request failed: {}", e);
                        println!("Sorry, something went wrong: {}", e);
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down, waiting for in-flight requests...");
    host.drain().await;
    sweeper.abort();

    if let Some(store) = sqlite_store {
        store.close().await;
    }
    Ok(())
}

/// 本地（进程内）Agent 目录：未配置远端目录时至少保证 fallback Agent 可用
fn build_local_snapshot(cfg: &AppConfig) -> AgentSnapshot {
    let fallback = &cfg.router.fallback_agent_id;
    let entries = vec![AgentEntry {
        descriptor: AgentDescriptor::local(
            fallback.clone(),
            "General-purpose assistant that answers anything the specialists can't",
        ),
        handle: Arc::new(EchoAgent::new(fallback.clone())),
    }];
    AgentSnapshot::new(entries)
}
