//! Access log: denied-access and task-transition events written off the
//! decision path.
//!
//! Handlers call [`AccessLog::record`], which never blocks: the event goes
//! onto a bounded queue or is dropped with a warning. A fixed set of workers
//! drains the queue into the `access_log` table, chaining each row's hash
//! to the previous one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::authz::TaskAction;
use crate::models::TaskState;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub subject_id: Option<String>,
    pub severity: Severity,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<String>, subject_id: Option<String>, severity: Severity, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            severity,
            payload,
        }
    }
}

/// A caller was refused an operation on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDenial {
    pub task_id: String,
    pub actor_id: String,
    pub operation: String,
}

impl Loggable for AccessDenial {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> String { self.task_id.clone() }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// An assignee or state change reported back to the workflow side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: String,
    pub action: TaskAction,
    pub old_assignee: Option<String>,
    pub new_assignee: Option<String>,
    pub old_state: TaskState,
    pub new_state: TaskState,
}

impl Loggable for TaskTransition {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> String { self.task_id.clone() }
}

/// Cloneable, non-blocking handle used on request paths.
#[derive(Debug, Clone)]
pub struct AccessLog {
    sender: mpsc::Sender<DomainEvent<Value>>,
}

impl AccessLog {
    /// Queues an event named `<entity_type>.<action>`. Fire and forget:
    /// a full or closed queue drops the event.
    pub fn record<T: Loggable>(&self, action: &str, actor_id: Option<&str>, entity: &T) {
        let name = format!("{}.{}", T::entity_type(), action);
        let event = DomainEvent::new(
            name,
            actor_id.map(str::to_string),
            Some(entity.subject_id()),
            entity.severity_for_action(action),
            serde_json::to_value(entity).unwrap_or_default(),
        );

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(event = %event.name, "access log queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(event = %event.name, "access log closed, dropping event");
            }
        }
    }
}

/// Owner of the worker pool. Keep it alive for the life of the service and
/// call [`AccessLogWorkers::shutdown`] on exit.
pub struct AccessLogWorkers {
    sender: mpsc::Sender<DomainEvent<Value>>,
    stop: watch::Sender<bool>,
    workers: JoinSet<()>,
}

impl AccessLogWorkers {
    pub fn spawn(pool: SqlitePool, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let writer = Arc::new(AccessLogWriter::new(pool));

        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            set.spawn(run_worker(worker, Arc::clone(&receiver), stop_rx.clone(), Arc::clone(&writer)));
        }
        tracing::info!(workers = workers.max(1), capacity, "access log workers started");

        Self {
            sender,
            stop,
            workers: set,
        }
    }

    pub fn handle(&self) -> AccessLog {
        AccessLog {
            sender: self.sender.clone(),
        }
    }

    /// Stops intake, lets workers drain what is queued, and aborts whatever
    /// is still running after `timeout`. Returns whether the drain finished.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        let _ = self.stop.send(true);

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(timeout_secs = timeout.as_secs(), "access log drain timed out, aborting workers");
            self.workers.abort_all();
            while self.workers.join_next().await.is_some() {}
        } else {
            tracing::info!("access log drained");
        }
        drained
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DomainEvent<Value>>>>,
    mut stop: watch::Receiver<bool>,
    writer: Arc<AccessLogWriter>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            if *stop.borrow_and_update() {
                rx.close();
                rx.recv().await
            } else {
                let woke = tokio::select! {
                    event = rx.recv() => Some(event),
                    _ = stop.changed() => None,
                };
                match woke {
                    Some(event) => event,
                    None => {
                        rx.close();
                        rx.recv().await
                    }
                }
            }
        };

        match next {
            Some(event) => writer.persist(event).await,
            None => break,
        }
    }
    tracing::debug!(worker, "access log worker stopped");
}

struct AccessLogWriter {
    pool: SqlitePool,
    // Appends must see the previous row's hash.
    chain: Mutex<()>,
}

impl AccessLogWriter {
    fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            chain: Mutex::new(()),
        }
    }

    async fn persist(&self, event: DomainEvent<Value>) {
        if let Err(e) = self.append(&event).await {
            tracing::error!(event = %event.name, "Failed to save access log entry: {}", e);
        }
    }

    async fn append(&self, event: &DomainEvent<Value>) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_string(event).unwrap_or_default();

        let _guard = self.chain.lock().await;
        let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM access_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let hash = chain_hash(prev_hash.as_deref(), &payload);

        sqlx::query(
            r#"
            INSERT INTO access_log (id, event_name, actor_id, subject_id, occurred_at, severity, payload, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(&event.name)
        .bind(&event.actor_id)
        .bind(&event.subject_id)
        .bind(event.occurred_at)
        .bind(event.severity.as_str())
        .bind(&payload)
        .bind(&prev_hash)
        .bind(&hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// SHA256(prev_hash || payload), hex encoded.
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recomputes the chain in insertion order. Returns the sequence number of
/// the first broken link, if any.
pub async fn verify_chain(pool: &SqlitePool) -> Result<Option<i64>, sqlx::Error> {
    let rows = sqlx::query("SELECT seq, payload, prev_hash, hash FROM access_log ORDER BY seq ASC")
        .fetch_all(pool)
        .await?;

    let mut prev: Option<String> = None;
    for row in rows {
        let seq: i64 = row.try_get("seq")?;
        let payload: String = row.try_get("payload")?;
        let stored_prev: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        if stored_prev != prev || chain_hash(prev.as_deref(), &payload) != hash {
            return Ok(Some(seq));
        }
        prev = Some(hash);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_hash_depends_on_previous() {
        let first = chain_hash(None, "{}");
        let second = chain_hash(Some(&first), "{}");
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(second, chain_hash(Some(&first), "{}"));
    }

    #[test]
    fn denial_severity_is_critical() {
        let denial = AccessDenial {
            task_id: "t1".into(),
            actor_id: "a1".into(),
            operation: "read".into(),
        };
        assert_eq!(denial.severity_for_action("access_denied"), Severity::Critical);

        let transition = TaskTransition {
            task_id: "t1".into(),
            action: TaskAction::Claim,
            old_assignee: None,
            new_assignee: Some("a1".into()),
            old_state: TaskState::Unassigned,
            new_state: TaskState::Assigned,
        };
        assert_eq!(transition.severity_for_action("claim"), Severity::Important);
        assert_eq!(transition.subject_id(), "t1");
    }

    #[tokio::test]
    async fn record_on_full_queue_does_not_block() {
        let (sender, _receiver) = mpsc::channel(1);
        let log = AccessLog { sender };
        let denial = AccessDenial {
            task_id: "t1".into(),
            actor_id: "a1".into(),
            operation: "read".into(),
        };
        log.record("access_denied", Some("a1"), &denial);
        log.record("access_denied", Some("a1"), &denial);
    }
}
