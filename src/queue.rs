//! Submission of sub-tasks to the task substrate.

use crate::{DispatchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = String;

#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    /// Queue one unit of work and return its task id.
    async fn submit(
        &self,
        kind: &str,
        config: &str,
        main_task_id: &str,
        extra: &str,
    ) -> Result<TaskId>;
}

/// Message pushed onto the worker queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub kind: String,
    pub kwargs: String,
    pub main_task_id: String,
    pub extra: String,
    pub created_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(kind: &str, config: &str, main_task_id: &str, extra: &str) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            kwargs: config.to_string(),
            main_task_id: main_task_id.to_string(),
            extra: extra.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Redis list backed queue consumed by the worker pool
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: MultiplexedConnection,
    queue_key: String,
}

impl RedisTaskQueue {
    pub async fn connect(redis_url: &str, queue_key: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        // Test connection
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Connected to task queue {} at {}", queue_key, redis_url);
        Ok(Self {
            conn,
            queue_key: queue_key.to_string(),
        })
    }

    fn status_key(task_id: &str) -> String {
        format!("task:{}:status", task_id)
    }
}

#[async_trait]
impl TaskSubmitter for RedisTaskQueue {
    async fn submit(
        &self,
        kind: &str,
        config: &str,
        main_task_id: &str,
        extra: &str,
    ) -> Result<TaskId> {
        let envelope = TaskEnvelope::new(kind, config, main_task_id, extra);
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();

        redis::cmd("HSET")
            .arg(Self::status_key(&envelope.task_id))
            .arg("state")
            .arg("CREATED")
            .arg("kind")
            .arg(kind)
            .arg("main_task_id")
            .arg(main_task_id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| DispatchError::submit(kind, e))?;

        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| DispatchError::submit(kind, e))?;

        debug!("Queued {} task {} under {}", kind, envelope.task_id, main_task_id);
        Ok(envelope.task_id)
    }
}

/// In-process queue that keeps every submission.
///
/// Backs dry runs of the CLI. `fail_after` makes the queue reject every
/// submission once that many have been accepted.
#[derive(Default)]
pub struct MemoryTaskQueue {
    submitted: Mutex<Vec<TaskEnvelope>>,
    fail_after: Option<usize>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(accepted: usize) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail_after: Some(accepted),
        }
    }

    pub fn submitted(&self) -> Vec<TaskEnvelope> {
        self.submitted.lock().clone()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.submitted.lock().iter().map(|t| t.kind.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskSubmitter for MemoryTaskQueue {
    async fn submit(
        &self,
        kind: &str,
        config: &str,
        main_task_id: &str,
        extra: &str,
    ) -> Result<TaskId> {
        let mut submitted = self.submitted.lock();
        if let Some(limit) = self.fail_after {
            if submitted.len() >= limit {
                return Err(DispatchError::submit(kind, "queue rejected the task"));
            }
        }
        let envelope = TaskEnvelope::new(kind, config, main_task_id, extra);
        let task_id = envelope.task_id.clone();
        submitted.push(envelope);
        Ok(task_id)
    }
}
