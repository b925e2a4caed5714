//! Task managers: inbound validation and the task lifecycle.
//!
//! A manager owns a task store and turns one `tasks/send` call into a
//! terminal task: upsert, SUBMITTED -> WORKING, run the work, append the
//! agent reply and finalize as COMPLETED or FAILED. Only a malformed
//! envelope is a client error; everything else ends in a well-formed task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::{FieldError, ValidationError};
use super::task_store::InMemoryTaskStore;
use super::types::{
    GetTaskRequest, GetTaskResponse, Message, Part, Role, SendTaskRequest, SendTaskResponse, Task,
    TaskQueryParams, TaskSendParams, TaskState, METHOD_GET_TASK, METHOD_SEND_TASK,
};
use crate::orchestrator::decision::Decision;
use crate::orchestrator::engine::{panic_message, Orchestrator};

/// Slack added on top of the orchestrator's own overall deadline before the
/// manager gives up on a run.
const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Inbound validation
// ---------------------------------------------------------------------------

/// A validated inbound JSON-RPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    Send(SendTaskRequest),
    Get(GetTaskRequest),
}

/// Validate a decoded request body.
///
/// Field problems are collected and reported together; an absent
/// `sessionId` is filled with a fresh id.
pub fn parse_request(body: &Value) -> Result<RpcCall, ValidationError> {
    let obj = body
        .as_object()
        .ok_or_else(|| ValidationError::InvalidRequest("request must be a JSON object".into()))?;
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::InvalidRequest("'method' must be a string".into()))?;
    let id = obj.get("id").cloned().unwrap_or(Value::Null);
    if !matches!(id, Value::Null | Value::String(_) | Value::Number(_)) {
        return Err(ValidationError::InvalidRequest("'id' must be a string, number or null".into()));
    }

    let mut errors = Vec::new();
    let params = match obj.get("params") {
        Some(Value::Object(params)) => params,
        Some(_) => return Err(invalid("params", "must be an object")),
        None => return Err(invalid("params", "field required")),
    };

    match method {
        METHOD_SEND_TASK => {
            let task_id = required_id(params, &mut errors);
            let session_id = match params.get("sessionId") {
                None | Some(Value::Null) => Uuid::new_v4().simple().to_string(),
                Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                Some(_) => {
                    errors.push(FieldError::new("params -> sessionId", "must be a non-empty string"));
                    String::new()
                }
            };
            let message = parse_message(params.get("message"), &mut errors);
            let metadata = match params.get("metadata") {
                None | Some(Value::Null) => None,
                Some(Value::Object(map)) => Some(map.clone().into_iter().collect()),
                Some(_) => {
                    errors.push(FieldError::new("params -> metadata", "must be an object"));
                    None
                }
            };
            match (errors.is_empty(), message) {
                (true, Some(message)) => {
                    let mut params = TaskSendParams::new(task_id, session_id, message);
                    params.metadata = metadata;
                    Ok(RpcCall::Send(SendTaskRequest::new(id, METHOD_SEND_TASK, params)))
                }
                _ => Err(ValidationError::InvalidParams(errors)),
            }
        }
        METHOD_GET_TASK => {
            let task_id = required_id(params, &mut errors);
            let history_length = match params.get("historyLength") {
                None | Some(Value::Null) => None,
                Some(v) => match v.as_u64() {
                    Some(n) => Some(n as usize),
                    None => {
                        errors.push(FieldError::new(
                            "params -> historyLength",
                            "must be a non-negative integer",
                        ));
                        None
                    }
                },
            };
            if !errors.is_empty() {
                return Err(ValidationError::InvalidParams(errors));
            }
            Ok(RpcCall::Get(GetTaskRequest::new(
                id,
                METHOD_GET_TASK,
                TaskQueryParams {
                    id: task_id,
                    history_length,
                },
            )))
        }
        other => Err(ValidationError::MethodNotFound(other.to_string())),
    }
}

fn invalid(field: &str, message: &str) -> ValidationError {
    ValidationError::InvalidParams(vec![FieldError::new(field, message)])
}

fn required_id(params: &Map<String, Value>, errors: &mut Vec<FieldError>) -> String {
    match params.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) => {
            errors.push(FieldError::new("params -> id", "must not be empty"));
            String::new()
        }
        Some(_) => {
            errors.push(FieldError::new("params -> id", "must be a string"));
            String::new()
        }
        None => {
            errors.push(FieldError::new("params -> id", "field required"));
            String::new()
        }
    }
}

fn parse_message(value: Option<&Value>, errors: &mut Vec<FieldError>) -> Option<Message> {
    let obj = match value {
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            errors.push(FieldError::new("params -> message", "must be an object"));
            return None;
        }
        None => {
            errors.push(FieldError::new("params -> message", "field required"));
            return None;
        }
    };

    let role = match obj.get("role").and_then(Value::as_str) {
        Some("user") => Some(Role::User),
        Some("agent") => Some(Role::Agent),
        _ => {
            errors.push(FieldError::new(
                "params -> message -> role",
                "must be 'user' or 'agent'",
            ));
            None
        }
    };

    let mut parts = Vec::new();
    match obj.get("parts") {
        Some(Value::Array(items)) if items.is_empty() => errors.push(FieldError::new(
            "params -> message -> parts",
            "must contain at least one part",
        )),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let field = format!("params -> message -> parts -> {}", i);
                match (
                    item.get("type").and_then(Value::as_str),
                    item.get("text").and_then(Value::as_str),
                ) {
                    (Some("text"), Some(text)) => parts.push(Part::text(text)),
                    (Some("text"), None) => {
                        errors.push(FieldError::new(format!("{} -> text", field), "field required"))
                    }
                    (Some(other), _) => errors.push(FieldError::new(
                        format!("{} -> type", field),
                        format!("unsupported part type '{}'", other),
                    )),
                    (None, _) => {
                        errors.push(FieldError::new(format!("{} -> type", field), "field required"))
                    }
                }
            }
        }
        Some(_) => errors.push(FieldError::new("params -> message -> parts", "must be a list")),
        None => errors.push(FieldError::new("params -> message -> parts", "field required")),
    }

    role.filter(|_| !parts.is_empty()).map(|role| Message { role, parts })
}

// ---------------------------------------------------------------------------
// Task managers
// ---------------------------------------------------------------------------

/// Server side of the task protocol.
#[async_trait]
pub trait TaskManager: Send + Sync {
    fn store(&self) -> &InMemoryTaskStore;

    /// Drive one task to a terminal state and return it.
    async fn on_send_task(&self, request: SendTaskRequest) -> SendTaskResponse;

    /// Read a task back, trimming history to `historyLength`.
    async fn on_get_task(&self, request: GetTaskRequest) -> GetTaskResponse {
        match self
            .store()
            .get_task(&request.params.id, request.params.history_length)
            .await
        {
            Ok(task) => GetTaskResponse::success(request.id, task),
            Err(e) => {
                log::warn!("tasks/get failed: {}", e);
                GetTaskResponse::failure(request.id, e.to_rpc_error())
            }
        }
    }
}

/// Shared lifecycle: upsert, WORKING, run `work` on the first text part,
/// append its reply and finalize with the state it reports.
///
/// Everything after the upsert runs on its own tokio task, so a caller that
/// is dropped mid-run (client disconnect) cannot leave the task WORKING.
async fn process_task<F, Fut>(store: Arc<InMemoryTaskStore>, params: TaskSendParams, work: F) -> Task
where
    F: FnOnce(String, String) -> Fut + Send + 'static,
    Fut: Future<Output = (String, TaskState)> + Send + 'static,
{
    let snapshot = store.upsert_task(&params).await;
    let task_id = params.id.clone();

    let lifecycle = tokio::spawn({
        let store = store.clone();
        async move {
            if let Err(e) = store.set_state(&params.id, TaskState::Working).await {
                log::error!("Cannot mark task {} working: {}", params.id, e);
            }

            let query = params.message.first_text().unwrap_or_default().to_string();
            let session_id = params.session_id.clone();
            let (reply, state) = match AssertUnwindSafe(async move { work(query, session_id).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    log::error!("Task {} panicked: {}", params.id, message);
                    (format!("Fatal error: {}", message), TaskState::Failed)
                }
            };

            match store.finalize(&params.id, Message::agent(reply), state).await {
                Ok(task) => {
                    log::info!("Task {} finished as {}", task.id, task.status.state);
                    Some(task)
                }
                Err(e) => {
                    log::error!("Cannot finalize task {}: {}", params.id, e);
                    None
                }
            }
        }
    });

    match lifecycle.await {
        Ok(Some(task)) => task,
        Ok(None) => snapshot,
        Err(e) => {
            log::error!("Task {} lifecycle aborted: {}", task_id, e);
            let reply = Message::agent(format!("Fatal error: {}", e));
            store
                .finalize(&task_id, reply, TaskState::Failed)
                .await
                .unwrap_or(snapshot)
        }
    }
}

/// Task manager of the coordinating agent.
pub struct OrchestratorTaskManager {
    orchestrator: Arc<Orchestrator>,
    store: Arc<InMemoryTaskStore>,
}

impl OrchestratorTaskManager {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            store: Arc::new(InMemoryTaskStore::new()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

#[async_trait]
impl TaskManager for OrchestratorTaskManager {
    fn store(&self) -> &InMemoryTaskStore {
        &self.store
    }

    async fn on_send_task(&self, request: SendTaskRequest) -> SendTaskResponse {
        let params = request.params;
        log::info!("Received task {} for session {}", params.id, params.session_id);

        let orchestrator = self.orchestrator.clone();
        let bound = orchestrator
            .config()
            .overall_timeout()
            .saturating_add(DEFAULT_DEADLINE_GRACE);
        let task = process_task(self.store.clone(), params, move |query, session_id| async move {
            orchestrator.ensure_health_sweep().await;
            let decision = match tokio::time::timeout(bound, orchestrator.run(&query, &session_id)).await {
                Ok(decision) => decision,
                Err(_) => {
                    log::error!("Orchestration timed out after {:.1}s", bound.as_secs_f64());
                    Decision::timed_out(format!("Request timed out after {:.1}s", bound.as_secs_f64()))
                }
            };
            let state = if decision.is_complete() {
                TaskState::Completed
            } else {
                TaskState::Failed
            };
            (decision.to_json(), state)
        })
        .await;

        SendTaskResponse::success(request.id, task)
    }
}

/// Business logic of a child agent.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Answer `query` within `session_id`.
    async fn invoke(&self, query: &str, session_id: &str) -> anyhow::Result<String>;
}

/// Task manager hosting a single [`AgentHandler`].
pub struct AgentTaskManager<H> {
    handler: Arc<H>,
    store: Arc<InMemoryTaskStore>,
}

impl<H: AgentHandler + 'static> AgentTaskManager<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            store: Arc::new(InMemoryTaskStore::new()),
        }
    }
}

#[async_trait]
impl<H: AgentHandler + 'static> TaskManager for AgentTaskManager<H> {
    fn store(&self) -> &InMemoryTaskStore {
        &self.store
    }

    async fn on_send_task(&self, request: SendTaskRequest) -> SendTaskResponse {
        let params = request.params;
        log::debug!("Agent task {} for session {}", params.id, params.session_id);

        let handler = self.handler.clone();
        let task = process_task(self.store.clone(), params, move |query, session_id| async move {
            match handler.invoke(&query, &session_id).await {
                Ok(text) => (text, TaskState::Completed),
                Err(e) => {
                    log::warn!("Handler failed: {:#}", e);
                    (format!("Error: {:#}", e), TaskState::Failed)
                }
            }
        })
        .await;

        SendTaskResponse::success(request.id, task)
    }
}
