//! Task queue abstraction and the in-process implementation.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkerResult;
use crate::task::{TaskPayload, TaskResult};

/// FIFO queue of stage tasks with at-least-once delivery.
///
/// A dequeued task stays in flight until it is acked; in-flight tasks of a
/// crashed worker are returned to the queue by `recover_in_flight`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &TaskPayload) -> WorkerResult<()>;

    /// Wait up to `timeout` for the next task.
    async fn dequeue(&self, timeout: Duration) -> WorkerResult<Option<TaskPayload>>;

    /// Mark a dequeued task as done.
    async fn ack(&self, task: &TaskPayload) -> WorkerResult<()>;

    async fn publish_result(&self, result: &TaskResult) -> WorkerResult<()>;

    async fn fetch_result(&self, task_id: Uuid) -> WorkerResult<Option<TaskResult>>;

    /// Number of tasks waiting to be dequeued.
    async fn len(&self) -> WorkerResult<usize>;

    /// Move un-acked tasks back onto the queue. Returns how many moved.
    async fn recover_in_flight(&self) -> WorkerResult<usize>;

    fn backend(&self) -> &'static str;
}

/// Results kept by [`InMemoryTaskQueue`] unless configured otherwise.
pub const DEFAULT_RESULT_CAPACITY: usize = 1024;

/// Latest result per task, oldest evicted past the capacity.
#[derive(Default)]
struct ResultCache {
    by_task: HashMap<Uuid, TaskResult>,
    order: VecDeque<Uuid>,
}

impl ResultCache {
    fn insert(&mut self, result: TaskResult, capacity: usize) {
        let task_id = result.task_id;
        if self.by_task.insert(task_id, result).is_none() {
            self.order.push_back(task_id);
        }
        while self.by_task.len() > capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.by_task.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Task queue held in process.
pub struct InMemoryTaskQueue {
    pending: Mutex<VecDeque<TaskPayload>>,
    in_flight: Mutex<HashMap<Uuid, TaskPayload>>,
    results: Mutex<ResultCache>,
    result_capacity: usize,
    notify: Notify,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            results: Mutex::new(ResultCache::default()),
            result_capacity: DEFAULT_RESULT_CAPACITY,
            notify: Notify::new(),
        }
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` task results.
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity.max(1);
        self
    }

    /// Number of dequeued but un-acked tasks.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn pop(&self) -> Option<TaskPayload> {
        let task = self.pending.lock().pop_front()?;
        self.in_flight.lock().insert(task.task_id, task.clone());
        Some(task)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: &TaskPayload) -> WorkerResult<()> {
        debug!(
            "Enqueued task {} ({} attempt {})",
            task.task_id, task.stage, task.attempt
        );
        self.pending.lock().push_back(task.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> WorkerResult<Option<TaskPayload>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.pop() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.pop());
            }
        }
    }

    async fn ack(&self, task: &TaskPayload) -> WorkerResult<()> {
        self.in_flight.lock().remove(&task.task_id);
        Ok(())
    }

    async fn publish_result(&self, result: &TaskResult) -> WorkerResult<()> {
        self.results
            .lock()
            .insert(result.clone(), self.result_capacity);
        Ok(())
    }

    async fn fetch_result(&self, task_id: Uuid) -> WorkerResult<Option<TaskResult>> {
        Ok(self.results.lock().by_task.get(&task_id).cloned())
    }

    async fn len(&self) -> WorkerResult<usize> {
        Ok(self.pending.lock().len())
    }

    async fn recover_in_flight(&self) -> WorkerResult<usize> {
        let recovered: Vec<TaskPayload> = self.in_flight.lock().drain().map(|(_, t)| t).collect();
        let count = recovered.len();
        if count > 0 {
            let mut pending = self.pending.lock();
            for task in recovered {
                pending.push_back(task);
            }
            drop(pending);
            self.notify.notify_waiters();
            info!("Recovered {} in-flight tasks", count);
        }
        Ok(count)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    use bus_core::WorkflowStage;

    use crate::task::{JobRecord, TaskStatus};

    fn task(stage: WorkflowStage) -> TaskPayload {
        let job = JobRecord::new("todo app", "todo", Map::new());
        TaskPayload::for_stage(&job, stage).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let queue = InMemoryTaskQueue::new();
        let first = task(WorkflowStage::QaTesting);
        let second = task(WorkflowStage::SecurityReview);
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let got = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(got.task_id, first.task_id);
        assert_eq!(queue.in_flight(), 1);

        queue.ack(&got).await.unwrap();
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out() {
        let queue = InMemoryTaskQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = task(WorkflowStage::Planning);
        queue.enqueue(&sent).await.unwrap();

        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.task_id, sent.task_id);
    }

    #[tokio::test]
    async fn test_recover_and_results() {
        let queue = InMemoryTaskQueue::new();
        let sent = task(WorkflowStage::Delivery);
        queue.enqueue(&sent).await.unwrap();
        let _ = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);

        assert_eq!(queue.recover_in_flight().await.unwrap(), 1);
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.in_flight(), 0);

        let result = TaskResult::new(&sent, TaskStatus::Succeeded);
        queue.publish_result(&result).await.unwrap();
        assert_eq!(queue.fetch_result(sent.task_id).await.unwrap(), Some(result));
        assert!(queue.fetch_result(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_results_are_bounded() {
        let queue = InMemoryTaskQueue::new().with_result_capacity(2);
        let tasks: Vec<TaskPayload> = (0..3).map(|_| task(WorkflowStage::Planning)).collect();

        for sent in &tasks {
            queue
                .publish_result(&TaskResult::new(sent, TaskStatus::Succeeded))
                .await
                .unwrap();
        }
        // A retry republishes under the same task id without taking a new slot.
        queue
            .publish_result(&TaskResult::new(&tasks[2], TaskStatus::Failed))
            .await
            .unwrap();

        assert!(queue.fetch_result(tasks[0].task_id).await.unwrap().is_none());
        assert!(queue.fetch_result(tasks[1].task_id).await.unwrap().is_some());
        let latest = queue.fetch_result(tasks[2].task_id).await.unwrap().unwrap();
        assert_eq!(latest.status, TaskStatus::Failed);
    }
}
