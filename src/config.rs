//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LUCIA__*` 覆盖（双下划线表示嵌套，如 `LUCIA__ROUTER__MAX_ATTEMPTS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：应用名、历史长度上限
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单个会话保留的历史消息条数上限
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_max_history_messages() -> usize {
    40
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// 后端：openai / mock；无 API Key 时自动回退 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// [router] 段：路由置信度阈值、重试次数、兜底与澄清 Agent
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// 结构化输出解析失败时的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_fallback_agent_id")]
    pub fallback_agent_id: String,
    #[serde(default = "default_clarification_agent_id")]
    pub clarification_agent_id: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_attempts: default_max_attempts(),
            fallback_agent_id: default_fallback_agent_id(),
            clarification_agent_id: default_clarification_agent_id(),
        }
    }
}

fn default_confidence_threshold() -> f32 {
    0.55
}

fn default_max_attempts() -> u32 {
    2
}

fn default_fallback_agent_id() -> String {
    "general-agent".to_string()
}

fn default_clarification_agent_id() -> String {
    "clarification-agent".to_string()
}

/// [agents] 段：聚合优先级、单 Agent 调用超时、远端目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentsSection {
    /// 聚合输出的优先级顺序；未列出的 Agent 按分发顺序排后
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    /// 远端 Agent 目录地址（{repository}/agents 返回 agent card 列表）
    pub repository: Option<String>,
    /// 访问远端目录与 Agent 的 X-Api-Key
    pub api_key: Option<String>,
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

/// [context] 段：空闲会话 TTL 与清扫周期
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// [store] 段：SQLite 路径（未设置时用内存存储）与任务 TTL
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: None,
            task_ttl_secs: default_task_ttl_secs(),
        }
    }
}

fn default_task_ttl_secs() -> u64 {
    86400
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            router: RouterSection::default(),
            agents: AgentsSection::default(),
            context: ContextSection::default(),
            store: StoreSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 LUCIA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LUCIA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LUCIA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（用于「配置热更新」：调用方可在运行时调用此函数并决定是否用新配置重建路由阈值等）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
