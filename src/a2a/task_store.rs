//! In-memory task store.
//!
//! The store is the single source of truth for task status and history.
//! Each task lives behind its own async mutex so read-modify-write
//! sequences on one id are serialized while different ids never block each
//! other. The outer map lock is held only for lookup/insert, never across
//! an await. Tasks are never evicted.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::errors::TaskStoreError;
use super::types::{Message, Task, TaskSendParams, TaskState, TaskStatus};

type TaskSlot = Arc<Mutex<Task>>;

/// Keyed, mutable collection of tasks.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<String, TaskSlot>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the task (SUBMITTED, history = [message]) or append the message
    /// to the existing one, leaving its status unchanged.
    ///
    /// Returns a snapshot of the task after the upsert.
    pub async fn upsert_task(&self, params: &TaskSendParams) -> Task {
        let slot = match self.tasks.entry(params.id.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let task = Task {
                    id: params.id.clone(),
                    session_id: Some(params.session_id.clone()),
                    status: TaskStatus::new(TaskState::Submitted),
                    history: vec![params.message.clone()],
                    metadata: params.metadata.clone(),
                };
                entry.insert(Arc::new(Mutex::new(task.clone())));
                log::debug!("Created task {}", params.id);
                return task;
            }
        };

        let mut task = slot.lock().await;
        task.history.push(params.message.clone());
        if task.session_id.is_none() {
            task.session_id = Some(params.session_id.clone());
        }
        log::debug!("Appended message to task {} (history: {})", task.id, task.history.len());
        task.clone()
    }

    /// Snapshot of a task, optionally keeping only the last `history_length` messages.
    pub async fn get_task(&self, id: &str, history_length: Option<usize>) -> Result<Task, TaskStoreError> {
        let mut task = self.update(id, |task| task.clone()).await?;
        if let Some(keep) = history_length {
            let skip = task.history.len().saturating_sub(keep);
            task.history.drain(..skip);
        }
        Ok(task)
    }

    /// Move a non-terminal task to `state`. Terminal tasks are left as they are.
    pub async fn set_state(&self, id: &str, state: TaskState) -> Result<Task, TaskStoreError> {
        self.update(id, |task| {
            transition(task, state);
            task.clone()
        })
        .await
    }

    /// Append `reply` and move the task to the terminal `state`.
    ///
    /// If the task is already terminal the reply is still recorded but the
    /// first terminal state is kept.
    pub async fn finalize(&self, id: &str, reply: Message, state: TaskState) -> Result<Task, TaskStoreError> {
        self.update(id, |task| {
            task.history.push(reply);
            transition(task, state);
            task.clone()
        })
        .await
    }

    /// Run `f` on the task inside its critical section.
    pub async fn update<F, R>(&self, id: &str, f: F) -> Result<R, TaskStoreError>
    where
        F: FnOnce(&mut Task) -> R,
    {
        let slot = self
            .tasks
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;
        let mut task = slot.lock().await;
        Ok(f(&mut task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn transition(task: &mut Task, state: TaskState) {
    if task.status.state.is_terminal() {
        if task.status.state != state {
            log::warn!(
                "Task {} is already {}; ignoring transition to {}",
                task.id, task.status.state, state
            );
        }
        return;
    }
    task.status = TaskStatus::new(state);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(id: &str, text: &str) -> TaskSendParams {
        TaskSendParams::new(id, "session-1", Message::user(text))
    }

    #[tokio::test]
    async fn test_upsert_creates_then_appends() {
        let store = InMemoryTaskStore::new();
        let first = store.upsert_task(&params("t1", "one")).await;
        assert_eq!(first.status.state, TaskState::Submitted);
        assert_eq!(first.history.len(), 1);
        assert_eq!(first.session_id.as_deref(), Some("session-1"));

        store.set_state("t1", TaskState::Working).await.unwrap();
        let second = store.upsert_task(&params("t1", "two")).await;
        assert_eq!(second.status.state, TaskState::Working);
        assert_eq!(second.history.len(), 2);
        // prefix is unchanged
        assert_eq!(second.history[0], first.history[0]);
        assert_eq!(second.history[1].first_text(), Some("two"));
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let store = InMemoryTaskStore::new();
        store.upsert_task(&params("t1", "q")).await;
        let done = store
            .finalize("t1", Message::agent("answer"), TaskState::Completed)
            .await
            .unwrap();
        assert_eq!(done.status.state, TaskState::Completed);

        let again = store
            .finalize("t1", Message::agent("late"), TaskState::Failed)
            .await
            .unwrap();
        assert_eq!(again.status.state, TaskState::Completed);
        assert_eq!(again.history.len(), 3);

        let working = store.set_state("t1", TaskState::Working).await.unwrap();
        assert_eq!(working.status.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_get_task_history_length() {
        let store = InMemoryTaskStore::new();
        for text in ["a", "b", "c"] {
            store.upsert_task(&params("t1", text)).await;
        }
        let tail = store.get_task("t1", Some(2)).await.unwrap();
        assert_eq!(tail.history.len(), 2);
        assert_eq!(tail.history[0].first_text(), Some("b"));

        let all = store.get_task("t1", None).await.unwrap();
        assert_eq!(all.history.len(), 3);

        let more = store.get_task("t1", Some(10)).await.unwrap();
        assert_eq!(more.history.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let store = InMemoryTaskStore::new();
        assert_eq!(
            store.get_task("nope", None).await,
            Err(TaskStoreError::NotFound("nope".into()))
        );
        assert!(store.finalize("nope", Message::agent("x"), TaskState::Failed).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_distinct_ids_do_not_interleave() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut handles = Vec::new();
        for id in ["a", "b"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    store.upsert_task(&params(id, &format!("{}-{}", id, i))).await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for id in ["a", "b"] {
            let task = store.get_task(id, None).await.unwrap();
            assert_eq!(task.history.len(), 50);
            for (i, msg) in task.history.iter().enumerate() {
                assert_eq!(msg.first_text(), Some(format!("{}-{}", id, i).as_str()));
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_id_keeps_every_append() {
        let store = Arc::new(InMemoryTaskStore::new());
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_task(&params("shared", &i.to_string())).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        let task = store.get_task("shared", None).await.unwrap();
        assert_eq!(task.history.len(), 20);
        assert_eq!(task.status.state, TaskState::Submitted);
        assert_eq!(store.len(), 1);
    }
}
