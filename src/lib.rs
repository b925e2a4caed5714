//! # a2a-orchestrator
//!
//! A coordinating agent for the A2A task protocol. It discovers child
//! agents from a registry, fans a user request out to them over JSON-RPC
//! with per-call and overall deadlines, and records the aggregated answer
//! on a task with an append-only history.
//!
//! - [`a2a`]: protocol types, connector, discovery, task store and managers
//! - [`orchestrator`]: decision policies, the fan-out run and its result
//! - [`server`]: the axum router every agent service exposes

pub mod a2a;
pub mod orchestrator;
pub mod server;

pub use a2a::config::{AppConfig, OrchestratorConfig, ServerConfig};
pub use a2a::types::{AgentCard, Message, Task, TaskState};
pub use orchestrator::{Decision, Orchestrator};

/// Crate version reported by `/health` and on agent cards.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
