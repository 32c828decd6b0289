//! 编排管线：路由 → 并发分发 → 聚合
//!
//! 每个入站请求是一条独立的管线实例；路由 LLM 调用、每次 Agent 调用与
//! 每次存储读写都是异步 I/O 边界。

pub mod aggregate;
pub mod dispatch;
pub mod router;
pub mod state;
pub mod wrapper;

pub use aggregate::{AggregationResult, FailedAgent, ResultAggregatorExecutor};
pub use dispatch::AgentDispatchExecutor;
pub use router::{choice_schema_json, AgentChoiceResult, RouterConfig, RouterExecutor};
pub use state::PipelineState;
pub use wrapper::{AgentExecutorWrapper, AgentResponse};
