//! Connector for one remote A2A agent.
//!
//! A connector performs a single bounded `tasks/send` call and reports the
//! result as an [`Outcome`] value. Deadline expiry, transport failures and
//! malformed envelopes are all values here; nothing raises past this
//! boundary.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::ConnectorError;
use super::types::{
    AgentCard, Message, SendTaskRequest, SendTaskResponse, TaskSendParams, METHOD_SEND_TASK,
};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What happened to one child-agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    /// Text of the most recent agent message.
    Reply(String),
    /// The call did not finish within its own deadline.
    Timeout,
    /// Connection error, non-2xx status, RPC error or malformed envelope.
    TransportError(String),
    /// The call was still pending when the overall deadline expired.
    Abandoned,
}

/// Result of one connector invocation, consumed during aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub agent_name: String,
    pub kind: OutcomeKind,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn reply(agent_name: impl Into<String>, text: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: OutcomeKind::Reply(text.into()),
            elapsed,
        }
    }

    pub fn timeout(agent_name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: OutcomeKind::Timeout,
            elapsed,
        }
    }

    pub fn transport_error(
        agent_name: impl Into<String>,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: OutcomeKind::TransportError(message.into()),
            elapsed,
        }
    }

    pub fn abandoned(agent_name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent_name: agent_name.into(),
            kind: OutcomeKind::Abandoned,
            elapsed,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, OutcomeKind::Reply(_))
    }

    pub fn reply_text(&self) -> Option<&str> {
        match &self.kind {
            OutcomeKind::Reply(text) => Some(text),
            _ => None,
        }
    }

    /// Short reason recorded for a step that produced no data.
    pub fn missing_reason(&self) -> Option<String> {
        match &self.kind {
            OutcomeKind::Reply(_) => None,
            OutcomeKind::Timeout => Some(format!(
                "timeout: {} did not respond within {:.1}s",
                self.agent_name,
                self.elapsed.as_secs_f64()
            )),
            OutcomeKind::TransportError(message) => {
                Some(format!("error calling {}: {}", self.agent_name, message))
            }
            OutcomeKind::Abandoned => Some(format!(
                "timed out: {} was still pending at the overall deadline",
                self.agent_name
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Client side of one child agent.
///
/// Implementations must be cheap to share across concurrent runs.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name of the agent this connector talks to.
    fn agent_name(&self) -> &str;

    /// Send `message` as a fresh task on `session_id`, bounded by `timeout`.
    async fn send_task(&self, message: &str, session_id: &str, timeout: Duration) -> Outcome;
}

/// HTTP JSON-RPC connector built from an agent card.
#[derive(Debug, Clone)]
pub struct A2AClient {
    /// Agent name (from the agent card).
    pub name: String,
    /// Endpoint the `tasks/send` envelope is posted to.
    pub endpoint: String,
    http: reqwest::Client,
}

impl A2AClient {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::with_http(name, endpoint, reqwest::Client::new())
    }

    /// Build with a shared HTTP client (connection pool).
    pub fn with_http(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            http,
        }
    }

    pub fn from_card(card: &AgentCard, http: reqwest::Client) -> Self {
        Self::with_http(card.name.clone(), card.url.clone(), http)
    }

    /// Post one `tasks/send` envelope and return the latest agent reply text.
    async fn call(&self, task_id: &str, message: &str, session_id: &str) -> Result<String, ConnectorError> {
        let request = SendTaskRequest::new(
            Uuid::new_v4().simple().to_string(),
            METHOD_SEND_TASK,
            TaskSendParams::new(task_id, session_id, Message::user(message)),
        );
        log::debug!("Sending task {} to {} at {}", task_id, self.name, self.endpoint);

        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        let envelope: SendTaskResponse =
            serde_json::from_slice(&body).map_err(|e| ConnectorError::Decode(e.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(ConnectorError::Remote(error));
        }
        let task = envelope
            .result
            .ok_or_else(|| ConnectorError::Decode("response has neither result nor error".into()))?;

        match task.last_agent_message().and_then(Message::first_text) {
            Some(text) => Ok(text.to_string()),
            None => Err(ConnectorError::NoReply { task_id: task.id.clone() }),
        }
    }
}

#[async_trait]
impl Connector for A2AClient {
    fn agent_name(&self) -> &str {
        &self.name
    }

    async fn send_task(&self, message: &str, session_id: &str, timeout: Duration) -> Outcome {
        let task_id = Uuid::new_v4().simple().to_string();
        let started = Instant::now();

        match tokio::time::timeout(timeout, self.call(&task_id, message, session_id)).await {
            Ok(Ok(text)) => {
                log::info!(
                    "Response from {}: {}",
                    self.name,
                    text.chars().take(200).collect::<String>()
                );
                Outcome::reply(&self.name, text, started.elapsed())
            }
            Ok(Err(e)) => {
                log::warn!("Error calling {}: {}", self.name, e);
                Outcome::transport_error(&self.name, e.to_string(), started.elapsed())
            }
            Err(_) => {
                log::error!(
                    "Timeout waiting for {} after {:.1}s",
                    self.name,
                    timeout.as_secs_f64()
                );
                Outcome::timeout(&self.name, started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_agent_is_transport_error() {
        // Port 9 (discard) on loopback is refused on any test machine.
        let client = A2AClient::new("Ghost", "http://127.0.0.1:9/");
        let outcome = client.send_task("hello", "s1", Duration::from_secs(5)).await;
        assert_eq!(outcome.agent_name, "Ghost");
        assert!(matches!(outcome.kind, OutcomeKind::TransportError(_)));
        assert!(outcome.missing_reason().unwrap().contains("Ghost"));
    }

    #[tokio::test]
    async fn test_silent_listener_bounded_by_timeout() {
        // Accepts connections and never writes a byte back.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(300);
        let client = A2AClient::new("Mute", format!("http://{}/", addr));
        let started = Instant::now();
        let outcome = client.send_task("hello", "s1", timeout).await;
        assert!(matches!(outcome.kind, OutcomeKind::Timeout), "got {:?}", outcome.kind);
        assert!(started.elapsed() < timeout + Duration::from_millis(200), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_missing_reason_per_kind() {
        let ok = Outcome::reply("Calc", "42", Duration::from_millis(5));
        assert!(ok.is_reply());
        assert_eq!(ok.reply_text(), Some("42"));
        assert!(ok.missing_reason().is_none());

        let slow = Outcome::timeout("Equip", Duration::from_secs(1));
        assert!(slow.missing_reason().unwrap().starts_with("timeout"));

        let pending = Outcome::abandoned("Equip", Duration::from_secs(90));
        assert!(pending.missing_reason().unwrap().contains("overall deadline"));
    }
}
