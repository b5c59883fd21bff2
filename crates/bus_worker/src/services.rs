//! Service wiring.
//!
//! [`build_container`] registers every backend named by the settings as a
//! lazy singleton, so a command only connects to what it resolves.
//! [`build_local_container`] wires in-process stores for single-process
//! runs. [`Runtime`] assembles the coordinator and worker from either.

use std::sync::Arc;

use bus_agents::{
    AgentConfig, AgentError, AgentRegistry, AgentServices, ArtifactStore, InMemoryArtifactStore,
    LlmAdapter, LlmClient, PostgresArtifactStore,
};
use bus_core::{
    services, CircuitBreakerRegistry, CoreError, CoreResult, MemoryBackend, ServiceContainer,
    Settings, REDIS_BREAKER,
};
use bus_memory::{build_memory_store, MemoryStore};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::coordinator::JobCoordinator;
use crate::error::WorkerResult;
use crate::queue::{InMemoryTaskQueue, TaskQueue};
use crate::redis_queue::RedisTaskQueue;
use crate::store::{InMemoryJobStore, JobStore};
use crate::postgres_store::PostgresJobStore;
use crate::worker::{Worker, WorkerConfig};

/// Register the networked services described by `settings`.
pub fn build_container(settings: Settings) -> ServiceContainer {
    let container = ServiceContainer::new();
    register_common(&container, settings);

    container.register_singleton::<ConnectionManager, _, _>(services::REDIS, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let client = redis::Client::open(settings.redis.url.as_str())
            .map_err(|e| CoreError::construction(services::REDIS, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::construction(services::REDIS, e))?;
        info!("Connected to Redis at {}", settings.redis.url);
        Ok(conn)
    });

    container.register_singleton::<Option<PgPool>, _, _>(services::POSTGRES, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let Some(url) = settings.postgres.url.clone() else {
            return Ok(None);
        };
        let pool = PgPoolOptions::new()
            .max_connections(settings.postgres.max_connections.max(1))
            .connect(&url)
            .await
            .map_err(|e| CoreError::construction(services::POSTGRES, e))?;
        info!("Connected to Postgres");
        Ok(Some(pool))
    });

    container.register_singleton::<Arc<dyn MemoryStore>, _, _>(services::MEMORY, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let breakers = c.resolve::<Arc<CircuitBreakerRegistry>>(services::BREAKERS).await?;
        let pool = match settings.memory.backend {
            MemoryBackend::Postgres | MemoryBackend::Hybrid => {
                c.resolve::<Option<PgPool>>(services::POSTGRES).await?
            }
            _ => None,
        };
        build_memory_store(&settings, pool, &breakers)
            .await
            .map_err(|e| CoreError::construction(services::MEMORY, e))
    });

    container.register_singleton::<Arc<dyn TaskQueue>, _, _>(services::TASK_QUEUE, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let breakers = c.resolve::<Arc<CircuitBreakerRegistry>>(services::BREAKERS).await?;
        let conn = c.resolve::<ConnectionManager>(services::REDIS).await?;
        let breaker = breakers.get_or_create(REDIS_BREAKER).await;
        Ok(Arc::new(RedisTaskQueue::new(conn, &settings.redis, breaker)) as Arc<dyn TaskQueue>)
    });

    container.register_singleton::<Arc<dyn JobStore>, _, _>(services::JOB_STORE, |c| async move {
        match c.resolve::<Option<PgPool>>(services::POSTGRES).await? {
            Some(pool) => {
                let store = PostgresJobStore::new(pool);
                store
                    .ensure_schema()
                    .await
                    .map_err(|e| CoreError::construction(services::JOB_STORE, e))?;
                Ok(Arc::new(store) as Arc<dyn JobStore>)
            }
            None => {
                warn!("DATABASE_URL not set; job state is kept in process only");
                Ok(Arc::new(InMemoryJobStore::new()) as Arc<dyn JobStore>)
            }
        }
    });

    container.register_singleton::<Arc<dyn ArtifactStore>, _, _>(
        services::ARTIFACT_STORE,
        |c| async move {
            match c.resolve::<Option<PgPool>>(services::POSTGRES).await? {
                Some(pool) => {
                    let store = PostgresArtifactStore::new(pool);
                    store
                        .ensure_schema()
                        .await
                        .map_err(|e| CoreError::construction(services::ARTIFACT_STORE, e))?;
                    Ok(Arc::new(store) as Arc<dyn ArtifactStore>)
                }
                None => Ok(Arc::new(InMemoryArtifactStore::new()) as Arc<dyn ArtifactStore>),
            }
        },
    );

    container
}

/// Register in-process services only. The LLM still follows the settings.
pub fn build_local_container(mut settings: Settings) -> ServiceContainer {
    if settings.memory.backend != MemoryBackend::InMemory {
        info!(
            "Local run: using in-memory store instead of '{}'",
            settings.memory.backend
        );
        settings.memory.backend = MemoryBackend::InMemory;
    }

    let container = ServiceContainer::new();
    register_common(&container, settings);

    container.register_instance::<Option<PgPool>>(services::POSTGRES, None);
    container.register_singleton::<Arc<dyn MemoryStore>, _, _>(services::MEMORY, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let breakers = c.resolve::<Arc<CircuitBreakerRegistry>>(services::BREAKERS).await?;
        build_memory_store(&settings, None, &breakers)
            .await
            .map_err(|e| CoreError::construction(services::MEMORY, e))
    });
    container.register_instance::<Arc<dyn TaskQueue>>(
        services::TASK_QUEUE,
        Arc::new(InMemoryTaskQueue::new()),
    );
    container.register_instance::<Arc<dyn JobStore>>(
        services::JOB_STORE,
        Arc::new(InMemoryJobStore::new()),
    );
    container.register_instance::<Arc<dyn ArtifactStore>>(
        services::ARTIFACT_STORE,
        Arc::new(InMemoryArtifactStore::new()),
    );
    container
}

/// Settings, breakers and the LLM client.
fn register_common(container: &ServiceContainer, settings: Settings) {
    let breakers = Arc::new(CircuitBreakerRegistry::new(settings.breaker_config()));
    container.register_instance(services::SETTINGS, Arc::new(settings));
    container.register_instance(services::BREAKERS, breakers);

    container.register_singleton::<Option<Arc<dyn LlmClient>>, _, _>(services::LLM, |c| async move {
        let settings = c.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        llm_from_settings(&settings)
    });
}

fn llm_from_settings(settings: &Settings) -> CoreResult<Option<Arc<dyn LlmClient>>> {
    match LlmAdapter::from_settings(&settings.llm) {
        Ok(adapter) => {
            info!(
                "LLM provider: {} ({})",
                adapter.provider(),
                adapter.model()
            );
            Ok(Some(Arc::new(adapter)))
        }
        Err(AgentError::LlmNotConfigured) => {
            info!(
                "No LLM configured for provider '{}'; agents use deterministic output",
                settings.llm.provider
            );
            Ok(None)
        }
        Err(e) => Err(CoreError::construction(services::LLM, e)),
    }
}

/// Everything a process needs to submit and execute jobs.
#[derive(Clone)]
pub struct Runtime {
    pub settings: Arc<Settings>,
    pub coordinator: Arc<JobCoordinator>,
    pub worker: Worker,
    pub services: AgentServices,
}

impl Runtime {
    /// Resolve the services and assemble the coordinator and worker.
    pub async fn from_container(container: &ServiceContainer) -> WorkerResult<Self> {
        let settings = container.resolve::<Arc<Settings>>(services::SETTINGS).await?;
        let breakers = container
            .resolve::<Arc<CircuitBreakerRegistry>>(services::BREAKERS)
            .await?;
        let llm = container
            .resolve::<Option<Arc<dyn LlmClient>>>(services::LLM)
            .await?;
        let memory = container
            .resolve::<Arc<dyn MemoryStore>>(services::MEMORY)
            .await?;
        let artifacts = container
            .resolve::<Arc<dyn ArtifactStore>>(services::ARTIFACT_STORE)
            .await?;
        let queue = container
            .resolve::<Arc<dyn TaskQueue>>(services::TASK_QUEUE)
            .await?;
        let store = container
            .resolve::<Arc<dyn JobStore>>(services::JOB_STORE)
            .await?;

        let mut agent_services = AgentServices::new(memory, artifacts)
            .with_breakers(breakers)
            .with_config(AgentConfig::from_settings(&settings));
        if let Some(llm) = llm {
            agent_services = agent_services.with_llm(llm);
        }

        let coordinator = Arc::new(JobCoordinator::new(store, queue));
        let worker = Worker::new(
            coordinator.clone(),
            Arc::new(AgentRegistry::with_defaults()),
            agent_services.clone(),
        )
        .with_config(WorkerConfig::from_settings(&settings.worker));

        Ok(Self {
            settings,
            coordinator,
            worker,
            services: agent_services,
        })
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.services.artifacts
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.services.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_core::LlmProviderKind;

    #[test]
    fn test_networked_container_is_lazy() {
        let container = build_container(Settings::default());
        for name in [
            services::SETTINGS,
            services::BREAKERS,
            services::LLM,
            services::REDIS,
            services::POSTGRES,
            services::MEMORY,
            services::TASK_QUEUE,
            services::JOB_STORE,
            services::ARTIFACT_STORE,
        ] {
            assert!(container.contains(name), "missing {}", name);
        }
    }

    #[tokio::test]
    async fn test_postgres_is_optional() {
        let container = build_container(Settings::default());
        let pool = container
            .resolve::<Option<PgPool>>(services::POSTGRES)
            .await
            .unwrap();
        assert!(pool.is_none());

        let store = container
            .resolve::<Arc<dyn JobStore>>(services::JOB_STORE)
            .await
            .unwrap();
        assert!(store.list_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_runtime_without_llm() {
        let mut settings = Settings::default();
        settings.llm.provider = LlmProviderKind::Mock;
        settings.memory.backend = MemoryBackend::Chroma;

        let runtime = Runtime::from_container(&build_local_container(settings))
            .await
            .unwrap();
        assert!(runtime.services.llm.is_none());
        assert_eq!(runtime.memory().backend(), "tfidf");
        assert_eq!(runtime.coordinator.queue().backend(), "memory");
        assert_eq!(runtime.settings.memory.backend, MemoryBackend::InMemory);
    }

    #[test]
    fn test_llm_requires_key() {
        let mut settings = Settings::default();
        settings.llm.api_key = None;
        assert!(llm_from_settings(&settings).unwrap().is_none());

        settings.llm.api_key = Some("sk-test".to_string());
        let llm = llm_from_settings(&settings).unwrap().unwrap();
        assert_eq!(llm.provider(), "anthropic");
    }
}
