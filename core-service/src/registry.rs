//! # Instance Registry
//!
//! Process-wide map from instance id to live [`EngineSession`].
//!
//! ## Overview
//!
//! - engine construction runs on the blocking pool because it touches local
//!   storage
//! - concurrent `create` calls for one id are not serialized: the last one to
//!   complete wins and the session it displaces is released
//! - every construction runs under a child of the registry's cancellation
//!   token, so `shutdown` abandons pending constructions. An engine that
//!   finishes after its attempt was cancelled is closed and never inserted
//! - commands keep their own `Arc` to the session, so replacing or removing
//!   an entry never pulls a session out from under a running command

use crate::error::{Result, ServiceError};
use crate::session::EngineSession;

use core_engine::{EngineFactory, EngineParams};
use core_runtime::events::{BridgeEvent, EventBus, InstanceEvent};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub struct InstanceRegistry {
    sessions: RwLock<HashMap<String, Arc<EngineSession>>>,
    factory: Arc<dyn EngineFactory>,
    root: CancellationToken,
    events: EventBus,
}

impl InstanceRegistry {
    pub fn new(factory: Arc<dyn EngineFactory>, events: EventBus) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            factory,
            root: CancellationToken::new(),
            events,
        }
    }

    /// Builds an engine for `instance_id` and stores the new session.
    ///
    /// # Errors
    ///
    /// - `ServiceError::Engine` when the factory fails
    /// - `ServiceError::Cancelled` when the registry shut down before or
    ///   during construction
    /// - `ServiceError::Worker` when construction panicked
    #[instrument(skip(self, params), fields(identity = %params.identity))]
    pub async fn create(&self, instance_id: &str, params: EngineParams) -> Result<Arc<EngineSession>> {
        let attempt = self.root.child_token();
        if attempt.is_cancelled() {
            return Err(self.cancelled(instance_id));
        }

        let factory = Arc::clone(&self.factory);
        let mut construction = tokio::task::spawn_blocking(move || factory.create(params));

        let built = tokio::select! {
            joined = &mut construction => joined,
            _ = attempt.cancelled() => {
                let id = instance_id.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(engine)) = construction.await {
                        warn!(instance_id = %id, "Construction finished after cancellation; engine closed");
                        engine.close();
                    }
                });
                return Err(self.cancelled(instance_id));
            }
        };

        let engine = match built {
            Ok(Ok(engine)) => engine,
            Ok(Err(error)) => {
                attempt.cancel();
                return Err(self.failed(instance_id, error.into()));
            }
            Err(join) => {
                attempt.cancel();
                let error = ServiceError::Worker(format!("Engine construction failed: {}", join));
                return Err(self.failed(instance_id, error));
            }
        };

        let session = Arc::new(EngineSession::new(instance_id, engine));
        let replaced = {
            let mut sessions = self.sessions.write().await;
            if self.root.is_cancelled() {
                drop(sessions);
                session.release();
                return Err(self.cancelled(instance_id));
            }
            sessions.insert(instance_id.to_string(), Arc::clone(&session))
        };

        if let Some(previous) = replaced {
            info!(instance_id, "Replacing existing session");
            previous.release();
            self.emit(InstanceEvent::Replaced {
                instance_id: instance_id.to_string(),
            });
        }

        info!(instance_id, "Instance initialized");
        self.emit(InstanceEvent::Initialized {
            instance_id: instance_id.to_string(),
            identity: session.identity().to_string(),
        });
        Ok(session)
    }

    pub async fn get(&self, instance_id: &str) -> Option<Arc<EngineSession>> {
        self.sessions.read().await.get(instance_id).cloned()
    }

    /// Removes and releases the session. Returns `false` for unknown ids.
    pub async fn remove(&self, instance_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(instance_id);
        match removed {
            Some(session) => {
                session.release();
                self.emit(InstanceEvent::Removed {
                    instance_id: instance_id.to_string(),
                });
                debug!(instance_id, "Instance removed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancels pending constructions and releases every session.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.root.cancel();
        let drained: Vec<(String, Arc<EngineSession>)> =
            self.sessions.write().await.drain().collect();
        for (instance_id, session) in drained {
            session.release();
            self.emit(InstanceEvent::Removed { instance_id });
        }
        info!("Instance registry shut down");
    }

    fn cancelled(&self, instance_id: &str) -> ServiceError {
        self.failed(
            instance_id,
            ServiceError::Cancelled {
                instance_id: instance_id.to_string(),
            },
        )
    }

    fn failed(&self, instance_id: &str, error: ServiceError) -> ServiceError {
        let code = error.code();
        warn!(instance_id, %code, error = %error, "Instance initialization failed");
        self.emit(InstanceEvent::InitFailed {
            instance_id: instance_id.to_string(),
            code,
        });
        error
    }

    fn emit(&self, event: InstanceEvent) {
        let _ = self.events.emit(BridgeEvent::Instance(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_auth::StaticTokenProvider;
    use core_engine::{CryptoEngine, EngineError, MockCryptoEngine};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(identity: &str) -> EngineParams {
        EngineParams {
            identity: identity.to_string(),
            token_provider: Arc::new(StaticTokenProvider::new("jwt")),
            enable_ratchet: true,
        }
    }

    /// Factory producing mocks that count `close` calls.
    fn counting_factory(closed: Arc<AtomicUsize>) -> Arc<dyn EngineFactory> {
        Arc::new(move |params: EngineParams| -> core_engine::Result<Arc<dyn CryptoEngine>> {
            let mut engine = MockCryptoEngine::new();
            engine.expect_identity().return_const(params.identity);
            let closed = Arc::clone(&closed);
            engine.expect_close().returning(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
            Ok(Arc::new(engine))
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = InstanceRegistry::new(
            counting_factory(Arc::new(AtomicUsize::new(0))),
            EventBus::new(16),
        );

        let session = registry.create("a", params("alice")).await.unwrap();

        assert_eq!(session.identity(), "alice");
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
        assert_eq!(registry.instance_ids().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_reinit_replaces_and_releases_previous() {
        let closed = Arc::new(AtomicUsize::new(0));
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let registry = InstanceRegistry::new(counting_factory(Arc::clone(&closed)), events);

        let first = registry.create("a", params("alice")).await.unwrap();
        let second = registry.create("a", params("bob")).await.unwrap();

        assert!(first.is_released());
        assert!(!second.is_released());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get("a").await.unwrap().identity(), "bob");
        assert_eq!(registry.len().await, 1);

        let mut replaced = false;
        while let Ok(event) = rx.try_recv() {
            if let BridgeEvent::Instance(InstanceEvent::Replaced { instance_id }) = event {
                replaced = instance_id == "a";
            }
        }
        assert!(replaced);
    }

    #[tokio::test]
    async fn test_factory_failure_leaves_registry_untouched() {
        let factory: Arc<dyn EngineFactory> =
            Arc::new(|_: EngineParams| -> core_engine::Result<Arc<dyn CryptoEngine>> {
                Err(EngineError::key_storage("disk full"))
            });
        let registry = InstanceRegistry::new(factory, EventBus::new(16));

        let err = registry.create("a", params("alice")).await.unwrap_err();

        assert_eq!(err.code(), "key_storage_exception");
        assert!(registry.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creates_for_distinct_ids() {
        let registry = Arc::new(InstanceRegistry::new(
            counting_factory(Arc::new(AtomicUsize::new(0))),
            EventBus::new(64),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .create(&format!("id-{}", i), params(&format!("user-{}", i)))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.len().await, 8);
        for i in 0..8 {
            let session = registry.get(&format!("id-{}", i)).await.unwrap();
            assert_eq!(session.identity(), format!("user-{}", i));
        }
    }

    #[tokio::test]
    async fn test_remove_and_shutdown() {
        let closed = Arc::new(AtomicUsize::new(0));
        let registry = InstanceRegistry::new(counting_factory(Arc::clone(&closed)), EventBus::new(16));
        registry.create("a", params("alice")).await.unwrap();
        registry.create("b", params("bob")).await.unwrap();

        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        registry.shutdown().await;
        assert!(registry.is_shut_down());
        assert!(registry.is_empty().await);
        assert_eq!(closed.load(Ordering::SeqCst), 2);

        let err = registry.create("c", params("carol")).await.unwrap_err();
        assert_eq!(err.code(), "initialization_cancelled");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancels_pending_construction() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        let closed = Arc::new(AtomicUsize::new(0));
        let inner = counting_factory(Arc::clone(&closed));
        let factory: Arc<dyn EngineFactory> = Arc::new(move |params: EngineParams| {
            let _ = release_rx.lock().recv();
            inner.create(params)
        });
        let registry = Arc::new(InstanceRegistry::new(factory, EventBus::new(16)));

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.create("a", params("alice")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        registry.shutdown().await;
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code(), "initialization_cancelled");

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty().await);
    }
}
