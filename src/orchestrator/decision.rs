//! The structured answer produced by one orchestration run.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::a2a::client::Outcome;

use super::policy::{DelegationStep, Interpretation};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap());
static OBJECT_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Where an orchestration run ended up.
///
/// `Started -> (CallingChild)* -> Aggregating -> {Done, TimedOut, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    CallingChild,
    Aggregating,
    Done,
    TimedOut,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::CallingChild => write!(f, "calling_child"),
            Self::Aggregating => write!(f, "aggregating"),
            Self::Done => write!(f, "done"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregated result of a run.
///
/// `data` holds each responding agent's reply (parsed as JSON when it is
/// JSON), `missing` the reason each non-responding step produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub decision: String,
    pub reasoning: String,
    /// Share of planned steps that returned data, 0.0 to 1.0.
    pub confidence: f64,
    pub state: RunState,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub missing: BTreeMap<String, String>,
    #[serde(default)]
    pub agents_consulted: Vec<String>,
}

impl Decision {
    /// A run that produced no aggregate.
    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self::error(RunState::Failed, reasoning)
    }

    /// A run cut short by the overall deadline before any step completed.
    pub fn timed_out(reasoning: impl Into<String>) -> Self {
        Self::error(RunState::TimedOut, reasoning)
    }

    fn error(state: RunState, reasoning: impl Into<String>) -> Self {
        Self {
            decision: "Error".to_string(),
            reasoning: reasoning.into(),
            confidence: 0.0,
            state,
            data: BTreeMap::new(),
            missing: BTreeMap::new(),
            agents_consulted: Vec::new(),
        }
    }

    /// Only a run that reached `Done` counts as a completed task.
    pub fn is_complete(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"decision":"Error","reasoning":"unserializable decision: {}"}}"#, e)
        })
    }
}

/// Fold outcomes (one per planned step, in plan order) into a decision.
pub fn aggregate(
    steps: &[DelegationStep],
    outcomes: &[Outcome],
    interpretation: Interpretation,
    state: RunState,
) -> Decision {
    let mut data = BTreeMap::new();
    let mut missing = BTreeMap::new();
    let mut agents_consulted: Vec<String> = Vec::new();

    for outcome in outcomes {
        if !agents_consulted.contains(&outcome.agent_name) {
            agents_consulted.push(outcome.agent_name.clone());
        }
        match outcome.reply_text() {
            Some(text) => {
                let key = unique_key(&data, &outcome.agent_name);
                data.insert(key, parse_reply(text));
            }
            None => {
                let key = unique_key(&missing, &outcome.agent_name);
                missing.insert(key, outcome.missing_reason().unwrap_or_default());
            }
        }
    }

    let confidence = if steps.is_empty() {
        0.0
    } else {
        outcomes.iter().filter(|o| o.is_reply()).count() as f64 / steps.len() as f64
    };

    Decision {
        decision: interpretation.decision,
        reasoning: interpretation.reasoning,
        confidence,
        state,
        data,
        missing,
        agents_consulted,
    }
}

/// `Calc`, then `Calc#2`, `Calc#3`, ... for repeated steps to one agent.
fn unique_key<V>(map: &BTreeMap<String, V>, name: &str) -> String {
    if !map.contains_key(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{}#{}", name, n))
        .find(|key| !map.contains_key(key))
        .unwrap_or_else(|| name.to_string())
}

/// Interpret a child's free-text reply as JSON where possible.
///
/// Tries the whole text, then fenced code blocks, then the outermost
/// `{...}` span; falls back to the text itself.
pub fn parse_reply(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return value;
    }
    for caps in FENCED_BLOCK.captures_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return value;
        }
    }
    if let Some(span) = OBJECT_SPAN.find(text) {
        if let Ok(value) = serde_json::from_str::<Value>(span.as_str()) {
            return value;
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn step(name: &str) -> DelegationStep {
        DelegationStep::new(name, "q")
    }

    fn interp() -> Interpretation {
        Interpretation::new("complete", "ok")
    }

    #[test]
    fn test_parse_reply_variants() {
        assert_eq!(parse_reply(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(
            parse_reply("Here you go:\n```json\n{\"tank\": 3.5}\n```\nbye"),
            json!({"tank": 3.5})
        );
        assert_eq!(
            parse_reply(r#"Result: {"machine": "ok"} (end)"#),
            json!({"machine": "ok"})
        );
        assert_eq!(parse_reply("just words"), json!("just words"));
    }

    #[test]
    fn test_aggregate_all_replies() {
        let steps = vec![step("Calc"), step("Equip")];
        let outcomes = vec![
            Outcome::reply("Calc", r#"{"needed": 10}"#, Duration::ZERO),
            Outcome::reply("Equip", "all machines running", Duration::ZERO),
        ];
        let d = aggregate(&steps, &outcomes, interp(), RunState::Done);
        assert!(d.is_complete());
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.agents_consulted, vec!["Calc".to_string(), "Equip".to_string()]);
        assert_eq!(d.data["Calc"], json!({"needed": 10}));
        assert_eq!(d.data["Equip"], json!("all machines running"));
        assert!(d.missing.is_empty());
    }

    #[test]
    fn test_aggregate_records_missing_data() {
        let steps = vec![step("Calc"), step("Equip")];
        let outcomes = vec![
            Outcome::reply("Calc", "{}", Duration::ZERO),
            Outcome::timeout("Equip", Duration::from_secs(1)),
        ];
        let d = aggregate(&steps, &outcomes, interp(), RunState::Done);
        assert_eq!(d.confidence, 0.5);
        assert!(d.missing["Equip"].starts_with("timeout"));
        assert!(!d.data.contains_key("Equip"));
        assert_eq!(d.agents_consulted.len(), 2);
    }

    #[test]
    fn test_repeated_agent_keys() {
        let steps = vec![step("Calc"), step("Calc")];
        let outcomes = vec![
            Outcome::reply("Calc", "1", Duration::ZERO),
            Outcome::reply("Calc", "2", Duration::ZERO),
        ];
        let d = aggregate(&steps, &outcomes, interp(), RunState::Done);
        assert_eq!(d.data["Calc"], json!(1));
        assert_eq!(d.data["Calc#2"], json!(2));
        assert_eq!(d.agents_consulted, vec!["Calc".to_string()]);
    }

    #[test]
    fn test_failed_decision_json() {
        let d = Decision::failed("No agents are available");
        assert!(!d.is_complete());
        let v: Value = serde_json::from_str(&d.to_json()).unwrap();
        assert_eq!(v["decision"], "Error");
        assert_eq!(v["state"], "failed");
        assert_eq!(v["agentsConsulted"], json!([]));
    }
}
