//! Decision policies: which child agents to call and how to read their answers.
//!
//! The orchestrator treats a policy as opaque and possibly
//! non-deterministic (an LLM in production). The built-in policies here are
//! deterministic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::a2a::client::Outcome;
use crate::a2a::errors::PolicyError;

/// One delegation: send `message` to `agent_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStep {
    pub agent_name: String,
    pub message: String,
}

impl DelegationStep {
    pub fn new(agent_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            message: message.into(),
        }
    }
}

/// Ordered delegation steps issued in one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<DelegationStep>,
}

impl Plan {
    pub fn new(steps: Vec<DelegationStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A policy's reading of the collected outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpretation {
    pub decision: String,
    pub reasoning: String,
}

impl Interpretation {
    pub fn new(decision: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            reasoning: reasoning.into(),
        }
    }
}

/// Decides which agents to call and interprets their answers.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Plan delegation steps for `query` given the available agent names.
    async fn plan(&self, query: &str, agents: &[String]) -> Result<Plan, PolicyError>;

    /// Read the outcomes of the plan, in plan order.
    async fn interpret(&self, _query: &str, outcomes: &[Outcome]) -> Result<Interpretation, PolicyError> {
        Ok(summarize(outcomes))
    }
}

/// Deterministic reading: `complete`, `partial` or `insufficient_data`.
pub fn summarize(outcomes: &[Outcome]) -> Interpretation {
    let answered: Vec<&str> = outcomes
        .iter()
        .filter(|o| o.is_reply())
        .map(|o| o.agent_name.as_str())
        .collect();
    let missing: Vec<String> = outcomes.iter().filter_map(Outcome::missing_reason).collect();

    if missing.is_empty() && !answered.is_empty() {
        Interpretation::new(
            "complete",
            format!("Aggregated replies from {}", answered.join(", ")),
        )
    } else if answered.is_empty() {
        Interpretation::new(
            "insufficient_data",
            format!("No child agent returned data: {}", missing.join("; ")),
        )
    } else {
        Interpretation::new(
            "partial",
            format!(
                "Aggregated replies from {}; missing data: {}",
                answered.join(", "),
                missing.join("; ")
            ),
        )
    }
}

/// Sends the user query unchanged to every available agent.
#[derive(Debug, Clone, Default)]
pub struct BroadcastPolicy;

#[async_trait]
impl DecisionPolicy for BroadcastPolicy {
    async fn plan(&self, query: &str, agents: &[String]) -> Result<Plan, PolicyError> {
        if agents.is_empty() {
            return Err(PolicyError::NoAgents);
        }
        Ok(Plan::new(
            agents.iter().map(|name| DelegationStep::new(name, query)).collect(),
        ))
    }
}

/// Always returns the same plan, regardless of the query.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    plan: Plan,
}

impl StaticPolicy {
    pub fn new(steps: Vec<DelegationStep>) -> Self {
        Self {
            plan: Plan::new(steps),
        }
    }
}

#[async_trait]
impl DecisionPolicy for StaticPolicy {
    async fn plan(&self, _query: &str, _agents: &[String]) -> Result<Plan, PolicyError> {
        Ok(self.plan.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_plans_every_agent() {
        let agents = vec!["Calc".to_string(), "Equip".to_string()];
        let plan = BroadcastPolicy.plan("Can I make 3 batches?", &agents).await.unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1], DelegationStep::new("Equip", "Can I make 3 batches?"));
        assert_eq!(BroadcastPolicy.plan("q", &[]).await, Err(PolicyError::NoAgents));
    }

    #[tokio::test]
    async fn test_static_policy_ignores_query() {
        let policy = StaticPolicy::new(vec![DelegationStep::new("Calc", "materials for 3 batches")]);
        let plan = policy.plan("anything", &[]).await.unwrap();
        assert_eq!(plan.steps[0].message, "materials for 3 batches");
    }

    #[test]
    fn test_summarize() {
        let ok = Outcome::reply("Calc", "{}", Duration::ZERO);
        let slow = Outcome::timeout("Equip", Duration::from_secs(1));

        assert_eq!(summarize(&[ok.clone()]).decision, "complete");
        let partial = summarize(&[ok, slow.clone()]);
        assert_eq!(partial.decision, "partial");
        assert!(partial.reasoning.contains("Equip"));
        assert_eq!(summarize(&[slow]).decision, "insufficient_data");
        assert_eq!(summarize(&[]).decision, "insufficient_data");
    }
}
