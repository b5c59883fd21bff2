//! Integration tests for job execution through the queue and worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bus_agents::{
    AgentConfig, AgentRegistry, AgentServices, ArtifactSource, ArtifactStore,
    InMemoryArtifactStore, MockLlmClient,
};
use bus_core::{ArtifactKind, FallbackPolicy, WorkflowStage, WorkflowStatus};
use bus_memory::{InMemoryTfIdfStore, MemoryStore};
use bus_worker::{
    InMemoryJobStore, InMemoryTaskQueue, JobCoordinator, JobRecord, TaskQueue, TaskStatus, Worker,
    WorkerConfig, SKIP_OPTION,
};
use tokio::sync::watch;

const REQUIREMENT: &str = "A todo app with reminders, shared lists and offline sync";
const POLL: Duration = Duration::from_millis(200);

const PRD_RESPONSE: &str = r#"```json
{
  "title": "Todo PRD",
  "summary": "Shared todo lists with reminders",
  "features": [{"name": "Shared lists", "description": "Lists shared between users", "priority": "must"}],
  "user_stories": ["As a user, I want shared lists"],
  "acceptance_criteria": ["Lists sync between two devices"]
}
```"#;

struct Harness {
    coordinator: Arc<JobCoordinator>,
    queue: Arc<InMemoryTaskQueue>,
    artifacts: Arc<InMemoryArtifactStore>,
    memory: Arc<InMemoryTfIdfStore>,
    worker: Worker,
}

fn harness(llm: Option<MockLlmClient>, fallback: FallbackPolicy, config: WorkerConfig) -> Harness {
    let queue = Arc::new(InMemoryTaskQueue::new());
    let coordinator = Arc::new(JobCoordinator::new(
        Arc::new(InMemoryJobStore::new()),
        queue.clone(),
    ));
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    let memory = Arc::new(InMemoryTfIdfStore::new());

    let mut services = AgentServices::new(memory.clone(), artifacts.clone())
        .with_config(AgentConfig::default().with_fallback(fallback));
    if let Some(llm) = llm {
        services = services.with_llm(Arc::new(llm));
    }
    let worker = Worker::new(
        coordinator.clone(),
        Arc::new(AgentRegistry::with_defaults()),
        services,
    )
    .with_config(config);

    Harness {
        coordinator,
        queue,
        artifacts,
        memory,
        worker,
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_retry_backoff(Duration::from_millis(5))
        .with_poll_timeout(Duration::from_millis(50))
}

/// Process tasks inline until the queue stays empty for one poll.
async fn drain(worker: &Worker) -> usize {
    let mut processed = 0;
    while worker.run_once(POLL).await.unwrap().is_some() {
        processed += 1;
    }
    processed
}

async fn wait_for_terminal(coordinator: &JobCoordinator, job: &JobRecord) -> JobRecord {
    for _ in 0..200 {
        let current = coordinator.job(job.id).await.unwrap();
        if current.status.is_terminal() {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", job.id);
}

/// Test that a job runs every stage and produces one artifact per agent.
#[tokio::test]
async fn test_full_pipeline_in_process() {
    let h = harness(None, FallbackPolicy::OnError, fast_config());
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();

    assert_eq!(drain(&h.worker).await, 10);

    let job = h.coordinator.job(job.id).await.unwrap();
    assert_eq!(job.status, WorkflowStatus::Completed);
    assert!(job.error.is_none());

    let artifacts = h.artifacts.list(job.id).await.unwrap();
    let kinds: Vec<ArtifactKind> = artifacts.iter().map(|a| a.kind).collect();
    assert_eq!(kinds, ArtifactKind::all());
    assert!(artifacts.iter().all(|a| a.source == ArtifactSource::Mock));
    assert_eq!(h.memory.count().await.unwrap(), 10);

    let tasks = h.coordinator.store().list_tasks(job.id).await.unwrap();
    assert_eq!(tasks.len(), 10);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Succeeded));
    assert!(tasks.iter().all(|t| t.artifact_id.is_some()));
    assert_eq!(h.queue.in_flight(), 0);
}

/// Test that all four parallel stages are queued together and delivery waits for them.
#[tokio::test]
async fn test_parallel_stages_join_on_delivery() {
    let h = harness(None, FallbackPolicy::OnError, fast_config());
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();

    // prd, plan, architecture, ui/ux, development
    for _ in 0..5 {
        h.worker.run_once(POLL).await.unwrap().unwrap();
    }
    assert_eq!(h.queue.len().await.unwrap(), 4);

    let mut parallel = Vec::new();
    for _ in 0..4 {
        let result = h.worker.run_once(POLL).await.unwrap().unwrap();
        parallel.push(result.stage);
        if parallel.len() < 4 {
            let current = h.coordinator.job(job.id).await.unwrap();
            assert!(!current.workflow.is_active(WorkflowStage::Delivery));
        }
    }
    parallel.sort();
    assert_eq!(
        parallel,
        vec![
            WorkflowStage::QaTesting,
            WorkflowStage::SecurityReview,
            WorkflowStage::Documentation,
            WorkflowStage::SupportDocs,
        ]
    );

    let delivery = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(delivery.stage, WorkflowStage::Delivery);
    assert_eq!(
        h.coordinator.job(job.id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}

/// Test that skipped optional stages never run and delivery reports them missing.
#[tokio::test]
async fn test_skip_option() {
    let h = harness(None, FallbackPolicy::OnError, fast_config());
    let mut options = HashMap::new();
    options.insert(SKIP_OPTION.to_string(), "ui_ux_design, support_docs".to_string());
    let job = h.coordinator.submit(REQUIREMENT, "todo", options).await.unwrap();

    assert_eq!(drain(&h.worker).await, 8);
    assert_eq!(
        h.coordinator.job(job.id).await.unwrap().status,
        WorkflowStatus::Completed
    );

    let artifacts = h.artifacts.list(job.id).await.unwrap();
    assert_eq!(artifacts.len(), 8);
    assert!(h.artifacts.get(job.id, ArtifactKind::UiUxSpec).await.unwrap().is_none());

    let delivery = h
        .artifacts
        .get(job.id, ArtifactKind::DeliveryPackage)
        .await
        .unwrap()
        .unwrap();
    let missing: Vec<&str> = delivery.content["missing"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(missing.contains(&"ui_ux_spec"));
    assert!(missing.contains(&"support_guide"));
}

/// Test that a transient LLM failure is retried and the retry succeeds.
#[tokio::test]
async fn test_transient_failure_is_retried() {
    let llm = MockLlmClient::new()
        .fail_next(1)
        .with_default_response(PRD_RESPONSE);
    let h = harness(Some(llm), FallbackPolicy::Never, fast_config().with_max_attempts(3));
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();

    let first = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Retrying);
    assert_eq!(first.attempt, 0);
    assert!(first.error.is_some());

    let second = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(second.status, TaskStatus::Succeeded);
    assert_eq!(second.attempt, 1);
    assert_eq!(second.task_id, first.task_id);

    let prd = h
        .artifacts
        .get(job.id, ArtifactKind::Prd)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prd.source, ArtifactSource::Llm);
    assert_eq!(prd.content["title"], "Todo PRD");

    let published = h.queue.fetch_result(first.task_id).await.unwrap().unwrap();
    assert_eq!(published.status, TaskStatus::Succeeded);

    let job = h.coordinator.job(job.id).await.unwrap();
    assert!(job.workflow.is_active(WorkflowStage::Planning));
}

/// Test that a task failing on every attempt fails the job.
#[tokio::test]
async fn test_exhausted_attempts_fail_job() {
    let llm = MockLlmClient::new().simulate_failure("provider unavailable");
    let h = harness(Some(llm), FallbackPolicy::Never, fast_config().with_max_attempts(2));
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();

    let first = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Retrying);
    let last = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert!(h.worker.run_once(POLL).await.unwrap().is_none());

    let job = h.coordinator.job(job.id).await.unwrap();
    assert_eq!(job.status, WorkflowStatus::Failed);
    assert!(job
        .error
        .as_deref()
        .unwrap()
        .starts_with("prd_generation:"));
    assert!(h.artifacts.list(job.id).await.unwrap().is_empty());

    let tasks = h.coordinator.store().list_tasks(job.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasks[0].attempt, 1);
}

/// Test that tasks of a cancelled job are skipped without running agents.
#[tokio::test]
async fn test_cancelled_job_tasks_are_skipped() {
    let h = harness(None, FallbackPolicy::OnError, fast_config());
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();
    h.coordinator.cancel(job.id).await.unwrap();

    let result = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(result.status, TaskStatus::Skipped);
    assert!(h.worker.run_once(POLL).await.unwrap().is_none());

    assert!(h.artifacts.list(job.id).await.unwrap().is_empty());
    assert_eq!(
        h.coordinator.job(job.id).await.unwrap().status,
        WorkflowStatus::Cancelled
    );
}

/// Test that the pool runs concurrent jobs to completion and stops on shutdown.
#[tokio::test]
async fn test_worker_pool_runs_jobs_and_shuts_down() {
    let h = harness(None, FallbackPolicy::OnError, fast_config().with_concurrency(4));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = h.worker.clone();
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let first = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();
    let second = h
        .coordinator
        .submit("A chat app with channels and search", "chat", HashMap::new())
        .await
        .unwrap();

    for job in [&first, &second] {
        let finished = wait_for_terminal(&h.coordinator, job).await;
        assert_eq!(finished.status, WorkflowStatus::Completed);
        assert_eq!(h.artifacts.list(job.id).await.unwrap().len(), 10);
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(h.queue.in_flight(), 0);
    assert_eq!(h.queue.len().await.unwrap(), 0);
}

/// Test that tasks left in flight by a crashed worker are picked up again.
#[tokio::test]
async fn test_in_flight_tasks_are_recovered() {
    let h = harness(None, FallbackPolicy::OnError, fast_config());
    let job = h
        .coordinator
        .submit(REQUIREMENT, "todo", HashMap::new())
        .await
        .unwrap();

    let abandoned = h.queue.dequeue(POLL).await.unwrap().unwrap();
    assert_eq!(h.queue.in_flight(), 1);
    assert_eq!(h.queue.recover_in_flight().await.unwrap(), 1);

    let result = h.worker.run_once(POLL).await.unwrap().unwrap();
    assert_eq!(result.task_id, abandoned.task_id);
    assert_eq!(result.status, TaskStatus::Succeeded);
    assert!(h.artifacts.get(job.id, ArtifactKind::Prd).await.unwrap().is_some());
}
