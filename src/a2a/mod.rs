//! A2A (Agent-to-Agent) protocol module.
//!
//! Wire types, JSON-RPC error codes, configuration, the outbound connector,
//! registry discovery, the in-memory task store and the task managers that
//! serve `tasks/send` and `tasks/get`.

pub mod client;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod task_manager;
pub mod task_store;
pub mod types;

pub use client::{A2AClient, Connector, Outcome, OutcomeKind};
pub use discovery::{AgentRegistry, DiscoveryClient};
pub use task_manager::{AgentHandler, AgentTaskManager, OrchestratorTaskManager, TaskManager};
pub use task_store::InMemoryTaskStore;
