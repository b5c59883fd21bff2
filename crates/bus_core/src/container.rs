//! Lazy service container.
//!
//! Services are registered under a name with an async factory. Singletons
//! are built on first resolve and cached; transients are built on every
//! resolve. Factories receive the container so they can resolve their own
//! dependencies:
//!
//! ```rust,ignore
//! let container = ServiceContainer::new();
//! container.register_instance(services::SETTINGS, settings);
//! container.register_singleton(services::POSTGRES, |c| async move {
//!     let settings: Settings = c.resolve(services::SETTINGS).await?;
//!     connect(&settings.postgres).await
//! });
//!
//! let pool: PgPool = container.resolve(services::POSTGRES).await?;
//! ```
//!
//! Resolved values are cloned out of the container, so registered types are
//! typically handles (`Arc<dyn Trait>`, connection pools, clients).

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Well-known service names.
pub mod services {
    pub const SETTINGS: &str = "settings";
    pub const REDIS: &str = "redis";
    pub const POSTGRES: &str = "postgres";
    pub const LLM: &str = "llm";
    pub const MEMORY: &str = "memory";
    pub const BREAKERS: &str = "breakers";
    pub const TASK_QUEUE: &str = "task_queue";
    pub const JOB_STORE: &str = "job_store";
    pub const ARTIFACT_STORE: &str = "artifact_store";
}

/// How long a resolved service lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Singleton,
    Transient,
}

type AnyService = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(ServiceContainer) -> BoxFuture<'static, CoreResult<AnyService>> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    lifetime: Lifetime,
    type_name: &'static str,
    factory: Factory,
    instance: Arc<OnceCell<AnyService>>,
}

/// Service container with lazy singleton and transient factories.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
    /// Names being resolved on this resolution path.
    resolving: Arc<Vec<String>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lazily built singleton.
    ///
    /// The factory runs at most once per successful construction; a failed
    /// construction is retried on the next resolve.
    pub fn register_singleton<T, F, Fut>(&self, name: impl Into<String>, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(ServiceContainer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.register::<T, F, Fut>(name.into(), Lifetime::Singleton, factory);
    }

    /// Register a factory invoked on every resolve.
    pub fn register_transient<T, F, Fut>(&self, name: impl Into<String>, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(ServiceContainer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        self.register::<T, F, Fut>(name.into(), Lifetime::Transient, factory);
    }

    /// Register an already constructed singleton.
    pub fn register_instance<T>(&self, name: impl Into<String>, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        let name = name.into();
        let cell = OnceCell::new();
        let stored: AnyService = Arc::new(value.clone());
        let _ = cell.set(stored);

        let registration = Registration {
            lifetime: Lifetime::Singleton,
            type_name: type_name::<T>(),
            factory: Arc::new(move |_| {
                let value = value.clone();
                async move { Ok(Arc::new(value) as AnyService) }.boxed()
            }),
            instance: Arc::new(cell),
        };
        self.insert(name, registration);
    }

    fn register<T, F, Fut>(&self, name: String, lifetime: Lifetime, factory: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(ServiceContainer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let factory: Factory = Arc::new(move |container| {
            let fut = factory(container);
            async move { fut.await.map(|value| Arc::new(value) as AnyService) }.boxed()
        });

        let registration = Registration {
            lifetime,
            type_name: type_name::<T>(),
            factory,
            instance: Arc::new(OnceCell::new()),
        };
        self.insert(name, registration);
    }

    fn insert(&self, name: String, registration: Registration) {
        debug!(
            "Registering service: {} ({:?}, {})",
            name, registration.lifetime, registration.type_name
        );
        self.registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name, registration);
    }

    fn registration(&self, name: &str) -> Option<Registration> {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Resolve a service by name.
    pub async fn resolve<T>(&self, name: &str) -> CoreResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.resolving.iter().any(|n| n == name) {
            let mut path: Vec<String> = self.resolving.iter().cloned().collect();
            path.push(name.to_string());
            return Err(CoreError::CircularDependency(path.join(" -> ")));
        }

        let registration = self
            .registration(name)
            .ok_or_else(|| CoreError::ServiceNotFound(name.to_string()))?;

        let scoped = self.scoped(name);
        let service = match registration.lifetime {
            Lifetime::Singleton => registration
                .instance
                .get_or_try_init(|| (registration.factory)(scoped))
                .await?
                .clone(),
            Lifetime::Transient => (registration.factory)(scoped).await?,
        };

        service
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| CoreError::ServiceTypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// A view of this container that records `name` on the resolution path.
    fn scoped(&self, name: &str) -> ServiceContainer {
        let mut resolving: Vec<String> = self.resolving.iter().cloned().collect();
        resolving.push(name.to_string());
        ServiceContainer {
            registrations: self.registrations.clone(),
            resolving: Arc::new(resolving),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registration(name).is_some()
    }

    pub fn lifetime_of(&self, name: &str) -> Option<Lifetime> {
        self.registration(name).map(|r| r.lifetime)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drop cached singletons built by factories so they are rebuilt.
    ///
    /// Instances registered with [`register_instance`](Self::register_instance)
    /// are rebuilt from the stored value.
    pub fn reset_singletons(&self) {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for registration in registrations.values_mut() {
            if registration.lifetime == Lifetime::Singleton {
                registration.instance = Arc::new(OnceCell::new());
            }
        }
        debug!("Service singletons reset");
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Pool {
        url: String,
    }

    #[tokio::test]
    async fn test_singleton_built_once() {
        let container = ServiceContainer::new();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        container.register_singleton("postgres", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Pool {
                    url: "postgres://localhost".to_string(),
                }))
            }
        });

        assert_eq!(builds.load(Ordering::SeqCst), 0);
        let a: Arc<Pool> = container.resolve("postgres").await.unwrap();
        let b: Arc<Pool> = container.resolve("postgres").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_singleton_resolution() {
        let container = ServiceContainer::new();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        container.register_singleton("redis", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(Arc::new(7u32))
            }
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let container = container.clone();
            handles.push(tokio::spawn(async move {
                container.resolve::<Arc<u32>>("redis").await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap(), 7);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_built_every_time() {
        let container = ServiceContainer::new();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        container.register_transient("request_id", move |_| {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        assert_eq!(container.resolve::<usize>("request_id").await.unwrap(), 0);
        assert_eq!(container.resolve::<usize>("request_id").await.unwrap(), 1);
        assert_eq!(container.lifetime_of("request_id"), Some(Lifetime::Transient));
    }

    #[tokio::test]
    async fn test_factory_resolves_dependencies() {
        let container = ServiceContainer::new();
        container.register_instance("settings", "postgres://db".to_string());
        container.register_singleton("postgres", |c| async move {
            let url: String = c.resolve("settings").await?;
            Ok(Pool { url })
        });

        let pool: Pool = container.resolve("postgres").await.unwrap();
        assert_eq!(pool.url, "postgres://db");
    }

    #[tokio::test]
    async fn test_missing_and_mismatched_services() {
        let container = ServiceContainer::new();
        container.register_instance("llm", 42u64);

        assert!(matches!(
            container.resolve::<u64>("redis").await,
            Err(CoreError::ServiceNotFound(_))
        ));
        assert!(matches!(
            container.resolve::<String>("llm").await,
            Err(CoreError::ServiceTypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_circular_dependency_detected() {
        let container = ServiceContainer::new();
        container.register_singleton("a", |c| async move { c.resolve::<u8>("b").await });
        container.register_singleton("b", |c| async move { c.resolve::<u8>("a").await });

        let err = container.resolve::<u8>("a").await.unwrap_err();
        match err {
            CoreError::CircularDependency(path) => assert_eq!(path, "a -> b -> a"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failed_singleton_is_retried() {
        let container = ServiceContainer::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        container.register_singleton("redis", move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CoreError::construction("redis", "connection refused"))
                } else {
                    Ok(1u8)
                }
            }
        });

        assert!(container.resolve::<u8>("redis").await.is_err());
        assert_eq!(container.resolve::<u8>("redis").await.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_singletons_rebuilds() {
        let container = ServiceContainer::new();
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();

        container.register_singleton("memory", move |_| {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });
        container.register_instance("settings", 5u8);

        assert_eq!(container.resolve::<usize>("memory").await.unwrap(), 0);
        container.reset_singletons();
        assert_eq!(container.resolve::<usize>("memory").await.unwrap(), 1);
        assert_eq!(container.resolve::<u8>("settings").await.unwrap(), 5);
        assert_eq!(container.names(), vec!["memory", "settings"]);
    }
}
