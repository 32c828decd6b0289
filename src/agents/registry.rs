//! Agent 注册表
//!
//! 不可变快照 + 原子指针交换：读方总是看到一份完整目录，绝无半更新状态。
//! 刷新可从远端目录（{repository}/agents 的 agent card 列表）重建快照。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use super::{Agent, AgentDescriptor, AgentEndpoint, RemoteAgent};

/// 快照中的一项：描述符 + 可调用句柄
#[derive(Clone)]
pub struct AgentEntry {
    pub descriptor: AgentDescriptor,
    pub handle: Arc<dyn Agent>,
}

/// 不可变的 Agent 目录快照
#[derive(Default)]
pub struct AgentSnapshot {
    entries: Vec<AgentEntry>,
    by_id: HashMap<String, usize>,
}

impl AgentSnapshot {
    pub fn new(entries: Vec<AgentEntry>) -> Self {
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.descriptor.id.clone(), i))
            .collect();
        Self { entries, by_id }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentEntry> {
        self.by_id.get(agent_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.by_id.contains_key(agent_id)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn entries(&self) -> &[AgentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 远端目录返回的 agent card（字段与 A2A well-known card 对齐）
#[derive(Debug, Deserialize)]
struct AgentCard {
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

/// Agent 注册表：请求期间只读，刷新时整体换指针
pub struct AgentRegistry {
    snapshot: RwLock<Arc<AgentSnapshot>>,
    api_key: Option<String>,
}

impl AgentRegistry {
    pub fn new(snapshot: AgentSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// 当前快照（廉价克隆 Arc）
    pub fn snapshot(&self) -> Arc<AgentSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 原子替换快照
    pub fn replace(&self, snapshot: AgentSnapshot) {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }

    /// 从远端目录重建快照：拉取 agent card 列表，为每张卡构造 RemoteAgent；
    /// 本地（进程内）条目原样保留。返回新快照的条目数。
    pub async fn refresh_from_catalog(
        &self,
        http: &reqwest::Client,
        repository: &str,
    ) -> anyhow::Result<usize> {
        let catalog_url = format!("{}/agents", repository.trim_end_matches('/'));
        tracing::info!("Fetching agent catalog from {}", catalog_url);

        let mut request = http.get(&catalog_url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let cards: Vec<AgentCard> = request.send().await?.error_for_status()?.json().await?;
        tracing::info!("Discovered {} agent(s) from catalog", cards.len());

        let mut entries: Vec<AgentEntry> = self
            .snapshot()
            .entries()
            .iter()
            .filter(|e| e.descriptor.endpoint == AgentEndpoint::Local)
            .cloned()
            .collect();

        for card in cards {
            let agent_id = card.id.unwrap_or_else(|| card.name.clone());
            if card.url.is_empty() {
                tracing::warn!(agent_id, "Agent card has no url, skipping");
                continue;
            }
            // 相对地址解析到目录 base
            let url = if card.url.starts_with('/') {
                format!("{}{}", repository.trim_end_matches('/'), card.url)
            } else {
                card.url.clone()
            };

            let descriptor = AgentDescriptor {
                id: agent_id.clone(),
                name: card.name,
                description: card.description,
                capabilities: card.capabilities,
                endpoint: AgentEndpoint::Remote { url: url.clone() },
            };
            let handle = Arc::new(
                RemoteAgent::new(agent_id.as_str(), url.as_str(), self.api_key.clone())
                    .with_client(http.clone()),
            );
            entries.push(AgentEntry { descriptor, handle });
        }

        let count = entries.len();
        self.replace(AgentSnapshot::new(entries));
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::EchoAgent;

    fn entry(id: &str) -> AgentEntry {
        AgentEntry {
            descriptor: AgentDescriptor::local(id, format!("{} description", id)),
            handle: Arc::new(EchoAgent::new(id)),
        }
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = AgentSnapshot::new(vec![entry("light-agent"), entry("music-agent")]);
        assert!(snapshot.contains("light-agent"));
        assert!(!snapshot.contains("vacuum-agent"));
        assert_eq!(snapshot.get("music-agent").unwrap().descriptor.id, "music-agent");
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let registry = AgentRegistry::new(AgentSnapshot::new(vec![entry("light-agent")]));
        let before = registry.snapshot();
        assert!(before.contains("light-agent"));

        registry.replace(AgentSnapshot::new(vec![entry("music-agent")]));
        let after = registry.snapshot();
        assert!(!after.contains("light-agent"));
        assert!(after.contains("music-agent"));
        // 旧快照的持有者不受影响
        assert!(before.contains("light-agent"));
    }
}
