//! Redis-backed task queue.
//!
//! Tasks are `LPUSH`ed onto `queue_key` and moved atomically into
//! `queue_key:processing` by `BRPOPLPUSH`, so a task is never lost between
//! dequeue and ack. Results are stored under `agent_bus:result:<task_id>`
//! with a TTL. Every call goes through the `redis` circuit breaker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bus_core::{CircuitBreaker, CircuitBreakerError, RedisSettings};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};
use crate::queue::TaskQueue;
use crate::task::{TaskPayload, TaskResult};

const RESULT_PREFIX: &str = "agent_bus:result:";

/// Key under which the result of `task_id` is stored.
pub fn result_key(task_id: Uuid) -> String {
    format!("{}{}", RESULT_PREFIX, task_id)
}

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    queue_key: String,
    processing_key: String,
    result_ttl_secs: u64,
    breaker: Arc<CircuitBreaker>,
    /// Raw payloads of dequeued tasks, needed verbatim for `LREM`.
    raw_in_flight: Mutex<HashMap<Uuid, String>>,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager, settings: &RedisSettings, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            conn,
            queue_key: settings.queue_key.clone(),
            processing_key: format!("{}:processing", settings.queue_key),
            result_ttl_secs: settings.result_ttl_secs.max(1),
            breaker,
            raw_in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Open a managed connection to `settings.url`.
    pub async fn connect(settings: &RedisSettings, breaker: Arc<CircuitBreaker>) -> WorkerResult<Self> {
        let client = redis::Client::open(settings.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis queue '{}'", settings.queue_key);
        Ok(Self::new(conn, settings, breaker))
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn processing_key(&self) -> &str {
        &self.processing_key
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> WorkerResult<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.conn.clone();
        self.breaker
            .call(|| op(conn))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open { name, retry_after } => WorkerError::CircuitOpen(format!(
                    "circuit '{}' open, retry after {:?}",
                    name, retry_after
                )),
                CircuitBreakerError::Inner(e) => WorkerError::Redis(e),
            })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &TaskPayload) -> WorkerResult<()> {
        let raw = task.to_json()?;
        let key = self.queue_key.clone();
        self.guarded(|mut conn| async move {
            redis::cmd("LPUSH")
                .arg(&key)
                .arg(&raw)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        debug!("Enqueued task {} ({})", task.task_id, task.stage);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> WorkerResult<Option<TaskPayload>> {
        let source = self.queue_key.clone();
        let destination = self.processing_key.clone();
        let timeout_secs = timeout.as_secs().max(1);
        let raw: Option<String> = self
            .guarded(|mut conn| async move {
                redis::cmd("BRPOPLPUSH")
                    .arg(&source)
                    .arg(&destination)
                    .arg(timeout_secs)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match TaskPayload::from_json(&raw) {
            Ok(task) => {
                self.raw_in_flight.lock().insert(task.task_id, raw);
                Ok(Some(task))
            }
            Err(e) => {
                warn!("Dropping malformed task payload: {}", e);
                let key = self.processing_key.clone();
                self.guarded(|mut conn| async move {
                    redis::cmd("LREM")
                        .arg(&key)
                        .arg(1)
                        .arg(&raw)
                        .query_async::<_, i64>(&mut conn)
                        .await
                })
                .await?;
                Err(e)
            }
        }
    }

    async fn ack(&self, task: &TaskPayload) -> WorkerResult<()> {
        let raw = match self.raw_in_flight.lock().remove(&task.task_id) {
            Some(raw) => raw,
            None => task.to_json()?,
        };
        let key = self.processing_key.clone();
        let removed = self
            .guarded(|mut conn| async move {
                redis::cmd("LREM")
                    .arg(&key)
                    .arg(1)
                    .arg(&raw)
                    .query_async::<_, i64>(&mut conn)
                    .await
            })
            .await?;
        if removed == 0 {
            debug!("Task {} was not in the processing list", task.task_id);
        }
        Ok(())
    }

    async fn publish_result(&self, result: &TaskResult) -> WorkerResult<()> {
        let raw = serde_json::to_string(result)?;
        let key = result_key(result.task_id);
        let ttl = self.result_ttl_secs;
        self.guarded(|mut conn| async move {
            redis::cmd("SET")
                .arg(&key)
                .arg(&raw)
                .arg("EX")
                .arg(ttl)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn fetch_result(&self, task_id: Uuid) -> WorkerResult<Option<TaskResult>> {
        let key = result_key(task_id);
        let raw: Option<String> = self
            .guarded(|mut conn| async move {
                redis::cmd("GET").arg(&key).query_async(&mut conn).await
            })
            .await?;
        raw.map(|r| serde_json::from_str(&r).map_err(WorkerError::from))
            .transpose()
    }

    async fn len(&self) -> WorkerResult<usize> {
        let key = self.queue_key.clone();
        let len: i64 = self
            .guarded(|mut conn| async move {
                redis::cmd("LLEN").arg(&key).query_async(&mut conn).await
            })
            .await?;
        Ok(len.max(0) as usize)
    }

    async fn recover_in_flight(&self) -> WorkerResult<usize> {
        let mut recovered = 0usize;
        loop {
            let source = self.processing_key.clone();
            let destination = self.queue_key.clone();
            let moved: Option<String> = self
                .guarded(|mut conn| async move {
                    redis::cmd("RPOPLPUSH")
                        .arg(&source)
                        .arg(&destination)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        self.raw_in_flight.lock().clear();
        if recovered > 0 {
            info!("Recovered {} in-flight tasks from {}", recovered, self.processing_key);
        }
        Ok(recovered)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
