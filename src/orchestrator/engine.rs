//! The orchestrator: fan a request out to child agents and aggregate.
//!
//! One run consults the [`DecisionPolicy`] for a plan, calls every planned
//! agent concurrently (each call bounded by the per-call timeout), and
//! stops collecting when the overall deadline expires. Whatever has
//! arrived by then is aggregated; steps still pending are recorded as
//! abandoned. Nothing inside a run escapes as an error or panic: every path
//! ends in a [`Decision`].

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::OnceCell;

use crate::a2a::client::{A2AClient, Connector, Outcome};
use crate::a2a::config::{OrchestratorConfig, MAX_TIMEOUT};
use crate::a2a::discovery::AgentRegistry;

use super::decision::{aggregate, Decision, RunState};
use super::policy::{summarize, DecisionPolicy, Plan};

/// Message and session used by the health sweep.
const HEALTH_CHECK_MESSAGE: &str = "ping";
const HEALTH_CHECK_SESSION: &str = "health-check";

/// Fan-out orchestrator over a fixed set of connectors.
///
/// Connectors and config are read-only after construction, so one
/// orchestrator can serve any number of concurrent runs.
pub struct Orchestrator {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
    policy: Arc<dyn DecisionPolicy>,
    config: OrchestratorConfig,
    health: OnceCell<BTreeMap<String, bool>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
            .field("policy", &"<policy>")
            .field("config", &self.config)
            .field("health", &self.health.get())
            .finish()
    }
}

impl Orchestrator {
    /// Build from explicit connectors. A repeated agent name keeps the first.
    pub fn new(
        connectors: Vec<Arc<dyn Connector>>,
        policy: Arc<dyn DecisionPolicy>,
        config: OrchestratorConfig,
    ) -> Self {
        let mut table: BTreeMap<String, Arc<dyn Connector>> = BTreeMap::new();
        for connector in connectors {
            let name = connector.agent_name().to_string();
            table.entry(name).or_insert(connector);
        }
        Self {
            connectors: table,
            policy,
            config,
            health: OnceCell::new(),
        }
    }

    /// One HTTP connector per discovered card, sharing a connection pool.
    pub fn from_registry(
        registry: &AgentRegistry,
        policy: Arc<dyn DecisionPolicy>,
        config: OrchestratorConfig,
    ) -> Self {
        let http = reqwest::Client::new();
        let connectors = registry
            .cards()
            .map(|card| Arc::new(A2AClient::from_card(card, http.clone())) as Arc<dyn Connector>)
            .collect();
        Self::new(connectors, policy, config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Names of the agents this orchestrator can call, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Health sweep
    // -----------------------------------------------------------------------

    /// Call every agent once, concurrently, with the health-check timeout.
    pub async fn check_child_agents(&self) -> BTreeMap<String, bool> {
        let timeout = self.config.health_check_timeout();
        let checks = self.connectors.keys().map(|name| async move {
            let outcome = self
                .call_one(name, HEALTH_CHECK_MESSAGE, HEALTH_CHECK_SESSION, timeout)
                .await;
            (name.clone(), outcome)
        });

        let mut status = BTreeMap::new();
        for (name, outcome) in join_all(checks).await {
            match outcome.missing_reason() {
                None => log::info!("{} is accessible", name),
                Some(reason) => log::warn!("{} is not accessible: {}", name, reason),
            }
            status.insert(name, outcome.is_reply());
        }
        status
    }

    /// Run the health sweep once per orchestrator; later calls return the
    /// first result. The sweep only logs and never blocks requests
    /// beyond its own timeout.
    pub async fn ensure_health_sweep(&self) -> &BTreeMap<String, bool> {
        self.health
            .get_or_init(|| async {
                log::info!("Running health check on {} child agents...", self.connectors.len());
                let status = self.check_child_agents().await;
                let unavailable: Vec<&String> =
                    status.iter().filter(|(_, up)| !**up).map(|(name, _)| name).collect();
                if status.is_empty() {
                    log::warn!("No child agents registered; requests will fail until agents are available");
                } else if unavailable.is_empty() {
                    log::info!("All child agents are accessible");
                } else {
                    log::warn!(
                        "Some child agents are not accessible: {:?}; continuing without them",
                        unavailable
                    );
                }
                status
            })
            .await
    }

    /// Result of the health sweep, if it has run.
    pub fn health_status(&self) -> Option<&BTreeMap<String, bool>> {
        self.health.get()
    }

    // -----------------------------------------------------------------------
    // Orchestration run
    // -----------------------------------------------------------------------

    /// Orchestrate `query` for `session_id`, bounded by the overall deadline.
    ///
    /// Panics raised by the policy are converted into a failed decision;
    /// a panicking connector only loses that agent's data.
    pub async fn run(&self, query: &str, session_id: &str) -> Decision {
        match AssertUnwindSafe(self.run_inner(query, session_id))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Orchestration fault: {}", message);
                Decision::failed(format!("Fatal error: {}", message))
            }
        }
    }

    async fn run_inner(&self, query: &str, session_id: &str) -> Decision {
        let started = Instant::now();
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.config.overall_timeout())
            .unwrap_or_else(|| now + MAX_TIMEOUT);
        log::info!("Orchestration {} for session {}", RunState::Started, session_id);

        let agents = self.agent_names();
        if agents.is_empty() {
            log::error!("No agents are available to handle the request");
            return Decision::failed("No agents are available: the registry resolved no child agents");
        }

        let plan = match tokio::time::timeout_at(deadline, self.policy.plan(query, &agents)).await {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                log::error!("Planning failed: {}", e);
                return Decision::failed(format!("Planning failed: {}", e));
            }
            Err(_) => {
                log::error!("Overall orchestration timeout while planning");
                return Decision::timed_out("Request timed out while planning");
            }
        };
        if plan.is_empty() {
            return Decision::failed("Decision policy planned no delegation steps");
        }

        let (outcomes, mut timed_out) = self.call_children(&plan, session_id, deadline, started).await;

        log::info!(
            "Orchestration {} {} outcomes after {:.2}s",
            RunState::Aggregating,
            outcomes.len(),
            started.elapsed().as_secs_f64()
        );
        let mut failure = None;
        let interpretation = if timed_out {
            summarize(&outcomes)
        } else {
            match tokio::time::timeout_at(deadline, self.policy.interpret(query, &outcomes)).await {
                Ok(Ok(interpretation)) => interpretation,
                Ok(Err(e)) => {
                    log::error!("Interpretation failed: {}", e);
                    failure = Some(format!("Interpretation failed: {}", e));
                    summarize(&outcomes)
                }
                Err(_) => {
                    timed_out = true;
                    summarize(&outcomes)
                }
            }
        };

        let state = if timed_out {
            RunState::TimedOut
        } else if failure.is_some() || !outcomes.iter().any(Outcome::is_reply) {
            RunState::Failed
        } else {
            RunState::Done
        };

        let mut decision = aggregate(&plan.steps, &outcomes, interpretation, state);
        if let Some(reason) = failure {
            decision.decision = "Error".to_string();
            decision.reasoning = reason;
        } else if timed_out {
            decision.reasoning = format!(
                "Overall deadline of {:.1}s exceeded; {}",
                self.config.overall_timeout().as_secs_f64(),
                decision.reasoning
            );
        }
        log::info!(
            "Orchestration {} (confidence {:.2}) in {:.2}s",
            decision.state,
            decision.confidence,
            started.elapsed().as_secs_f64()
        );
        decision
    }

    /// Issue every planned step concurrently and collect outcomes in plan
    /// order. Returns `true` if the overall deadline cut collection short;
    /// dropping the pending calls cancels them.
    async fn call_children(
        &self,
        plan: &Plan,
        session_id: &str,
        deadline: tokio::time::Instant,
        started: Instant,
    ) -> (Vec<Outcome>, bool) {
        let per_call = self.config.child_timeout();
        let mut pending: FuturesUnordered<_> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| async move {
                log::info!("Orchestration {} {}", RunState::CallingChild, step.agent_name);
                let outcome = self.call_one(&step.agent_name, &step.message, session_id, per_call).await;
                (index, outcome)
            })
            .collect();

        let mut slots: Vec<Option<Outcome>> = vec![None; plan.steps.len()];
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((index, outcome))) => slots[index] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    log::error!("Overall orchestration timeout; abandoning {} pending calls", pending.len());
                    timed_out = true;
                    break;
                }
            }
        }
        drop(pending);

        let outcomes = slots
            .into_iter()
            .zip(&plan.steps)
            .map(|(slot, step)| slot.unwrap_or_else(|| Outcome::abandoned(&step.agent_name, started.elapsed())))
            .collect();
        (outcomes, timed_out)
    }

    /// One bounded call. The per-call timeout is enforced here as well so a
    /// connector that ignores its `timeout` argument is still bounded, and a
    /// panicking connector becomes a transport error for that agent only.
    async fn call_one(&self, agent_name: &str, message: &str, session_id: &str, timeout: Duration) -> Outcome {
        let started = Instant::now();
        let Some(connector) = self.connectors.get(agent_name) else {
            log::warn!("Plan names unknown agent '{}'", agent_name);
            return Outcome::transport_error(
                agent_name,
                format!("unknown agent '{}'; available: {}", agent_name, self.agent_names().join(", ")),
                started.elapsed(),
            );
        };
        let call = async { tokio::time::timeout(timeout, connector.send_task(message, session_id, timeout)).await };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                log::error!("Timeout waiting for {}", agent_name);
                Outcome::timeout(agent_name, started.elapsed())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("Connector for {} panicked: {}", agent_name, message);
                Outcome::transport_error(agent_name, format!("connector panicked: {}", message), started.elapsed())
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::errors::PolicyError;
    use crate::orchestrator::policy::{BroadcastPolicy, DelegationStep, Interpretation, StaticPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies after `delay`, counting calls.
    struct StubConnector {
        name: String,
        delay: Duration,
        reply: String,
        calls: AtomicUsize,
    }

    impl StubConnector {
        fn new(name: &str, delay: Duration, reply: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                delay,
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn agent_name(&self) -> &str {
            &self.name
        }

        // Deliberately ignores `timeout`; the orchestrator must still bound it.
        async fn send_task(&self, _message: &str, _session_id: &str, _timeout: Duration) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Outcome::reply(&self.name, &self.reply, self.delay)
        }
    }

    /// Panics on every call.
    struct Boom;

    #[async_trait]
    impl Connector for Boom {
        fn agent_name(&self) -> &str {
            "Boom"
        }

        async fn send_task(&self, _message: &str, _session_id: &str, _timeout: Duration) -> Outcome {
            panic!("connector exploded");
        }
    }

    struct PanickingPolicy;

    #[async_trait]
    impl DecisionPolicy for PanickingPolicy {
        async fn plan(&self, _query: &str, _agents: &[String]) -> Result<Plan, PolicyError> {
            panic!("policy exploded");
        }
    }

    struct FailingInterpretation;

    #[async_trait]
    impl DecisionPolicy for FailingInterpretation {
        async fn plan(&self, query: &str, agents: &[String]) -> Result<Plan, PolicyError> {
            BroadcastPolicy.plan(query, agents).await
        }

        async fn interpret(&self, _query: &str, _outcomes: &[Outcome]) -> Result<Interpretation, PolicyError> {
            Err(PolicyError::Failed("model returned garbage".into()))
        }
    }

    fn config(child: f64, overall: f64) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_child_timeout(child)
            .with_overall_timeout(overall)
            .with_health_check_timeout(0.2)
    }

    fn orchestrator(
        connectors: Vec<Arc<dyn Connector>>,
        policy: Arc<dyn DecisionPolicy>,
        cfg: OrchestratorConfig,
    ) -> Orchestrator {
        Orchestrator::new(connectors, policy, cfg)
    }

    #[tokio::test]
    async fn test_all_agents_respond() {
        let calc = StubConnector::new("Calc", Duration::from_millis(10), r#"{"flour": 20}"#);
        let equip = StubConnector::new("Equip", Duration::from_millis(20), r#"{"mixer": "running"}"#);
        let orch = orchestrator(vec![calc, equip], Arc::new(BroadcastPolicy), config(1.0, 5.0));

        let d = orch.run("Can I make 3 batches?", "s1").await;
        assert_eq!(d.state, RunState::Done);
        assert_eq!(d.decision, "complete");
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.agents_consulted, vec!["Calc".to_string(), "Equip".to_string()]);
        assert_eq!(d.data["Equip"]["mixer"], "running");
    }

    #[tokio::test]
    async fn test_slow_agent_bounded_by_per_call_timeout() {
        let calc = StubConnector::new("Calc", Duration::from_millis(10), "{}");
        let equip = StubConnector::new("Equip", Duration::from_secs(60), "{}");
        let orch = orchestrator(vec![calc, equip], Arc::new(BroadcastPolicy), config(0.3, 10.0));

        let started = Instant::now();
        let d = orch.run("q", "s1").await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(d.state, RunState::Done);
        assert_eq!(d.decision, "partial");
        assert!(d.missing["Equip"].starts_with("timeout"));
        assert!(d.data.contains_key("Calc"));
    }

    #[tokio::test]
    async fn test_overall_deadline_abandons_pending() {
        let calc = StubConnector::new("Calc", Duration::from_millis(10), "{}");
        let equip = StubConnector::new("Equip", Duration::from_secs(60), "{}");
        let orch = orchestrator(vec![calc, equip], Arc::new(BroadcastPolicy), config(30.0, 0.3));

        let started = Instant::now();
        let d = orch.run("q", "s1").await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(d.state, RunState::TimedOut);
        assert!(!d.is_complete());
        assert!(d.data.contains_key("Calc"));
        assert!(d.missing["Equip"].contains("overall deadline"));
        assert!(d.reasoning.starts_with("Overall deadline"));
    }

    #[tokio::test]
    async fn test_no_agents_fails() {
        let orch = orchestrator(Vec::new(), Arc::new(BroadcastPolicy), config(1.0, 1.0));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Failed);
        assert!(d.reasoning.contains("No agents are available"));
    }

    #[tokio::test]
    async fn test_unknown_agent_in_plan() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "{}");
        let policy = StaticPolicy::new(vec![
            DelegationStep::new("Calc", "materials"),
            DelegationStep::new("Nobody", "hello"),
        ]);
        let orch = orchestrator(vec![calc], Arc::new(policy), config(1.0, 5.0));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Done);
        assert!(d.missing["Nobody"].contains("unknown agent"));
    }

    #[tokio::test]
    async fn test_every_step_failing_is_failed() {
        let equip = StubConnector::new("Equip", Duration::from_secs(60), "{}");
        let orch = orchestrator(vec![equip], Arc::new(BroadcastPolicy), config(0.1, 5.0));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Failed);
        assert_eq!(d.decision, "insufficient_data");
        assert_eq!(d.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_policy_panic_becomes_failed_decision() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "{}");
        let orch = orchestrator(vec![calc], Arc::new(PanickingPolicy), config(1.0, 5.0));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Failed);
        assert!(d.reasoning.contains("policy exploded"));
    }

    #[tokio::test]
    async fn test_interpretation_error_keeps_data() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "{}");
        let orch = orchestrator(vec![calc], Arc::new(FailingInterpretation), config(1.0, 5.0));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Failed);
        assert_eq!(d.decision, "Error");
        assert!(d.data.contains_key("Calc"));
    }

    #[tokio::test]
    async fn test_health_sweep_runs_once() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "pong");
        let equip = StubConnector::new("Equip", Duration::from_secs(60), "pong");
        let orch = orchestrator(
            vec![calc.clone(), equip.clone()],
            Arc::new(BroadcastPolicy),
            config(1.0, 5.0),
        );
        assert!(orch.health_status().is_none());

        let status = orch.ensure_health_sweep().await.clone();
        assert_eq!(status.get("Calc"), Some(&true));
        assert_eq!(status.get("Equip"), Some(&false));

        orch.ensure_health_sweep().await;
        assert_eq!(calc.calls.load(Ordering::SeqCst), 1);
        assert_eq!(equip.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_connector_is_contained() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "{}");
        let orch = orchestrator(vec![calc, Arc::new(Boom)], Arc::new(BroadcastPolicy), config(1.0, 5.0));

        let status = orch.ensure_health_sweep().await;
        assert_eq!(status.get("Boom"), Some(&false));
        assert_eq!(status.get("Calc"), Some(&true));

        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Done);
        assert!(d.data.contains_key("Calc"));
        assert!(d.missing["Boom"].contains("connector exploded"));
    }

    #[tokio::test]
    async fn test_unbounded_overall_timeout_still_runs() {
        let calc = StubConnector::new("Calc", Duration::ZERO, "{}");
        let orch = orchestrator(vec![calc], Arc::new(BroadcastPolicy), config(1.0, f64::INFINITY));
        let d = orch.run("q", "s1").await;
        assert_eq!(d.state, RunState::Done);
    }
}
