//! Lucia - Rust 智能家居多 Agent 编排服务
//!
//! 模块划分：
//! - **agents**: Agent 调用契约、描述符、注册表快照与远端 A2A 对端
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文、每 Agent 线程与生命周期管理
//! - **core**: 错误分类与优雅关闭
//! - **host**: 顶层请求生命周期（水合 → 路由 → 分发 → 聚合 → 持久化）
//! - **llm**: Chat 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **orchestration**: 路由、单 Agent 包装、并发分发与结果聚合
//! - **store**: 版本化 KV 任务存储（内存 / SQLite），CAS + TTL + 活跃索引

pub mod agents;
pub mod config;
pub mod context;
pub mod core;
pub mod host;
pub mod llm;
pub mod orchestration;
pub mod store;

pub use host::{HostRequest, HostResponse, TaskAwareHostService};
