//! Orchestration core.
//!
//! Given a user query, a [`DecisionPolicy`] plans which child agents to
//! consult; the [`Orchestrator`] calls them concurrently under per-call and
//! overall deadlines and folds their outcomes into a [`Decision`].

pub mod decision;
pub mod engine;
pub mod policy;

pub use decision::{Decision, RunState};
pub use engine::Orchestrator;
pub use policy::{BroadcastPolicy, DecisionPolicy, DelegationStep, Interpretation, Plan, StaticPolicy};
