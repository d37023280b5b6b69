//! Core service façade and bootstrap helpers.
//!
//! This crate wires the host's method channel into the shared Rust core: it
//! owns the instance registry, routes every incoming [`MethodCall`] to the
//! right engine session and translates engine failures into the stable error
//! codes hosts branch on. Desktop apps and test harnesses typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) for an
//! in-process host channel and a dedicated reply thread.
//!
//! ```ignore
//! use core_service::{BridgeService, LocalHostChannel};
//! use core_engine::LocalCloud;
//!
//! let service = BridgeService::builder()
//!     .host(Arc::new(LocalHostChannel::new()))
//!     .local_engine(LocalCloud::new())
//!     .build()?;
//!
//! let envelope = service
//!     .dispatch(MethodCall::new("init", json!({ "_id": "a", "identity": "alice" })))
//!     .await;
//! ```

pub mod arguments;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod method;
pub mod registry;
pub mod session;
pub mod translate;

pub use dispatcher::{Dispatcher, ReplyHandle};
pub use envelope::{Envelope, ErrorReply};
pub use error::{Result, ServiceError};
pub use method::{Method, SessionMethod};
pub use registry::InstanceRegistry;
pub use session::EngineSession;
pub use translate::{translate, translate_token, UNKNOWN_ERROR};

pub use bridge_traits::{ChannelReply, HostChannel, InlineExecutor, MethodCall, MethodResult, ReplyExecutor};
pub use core_runtime::{BridgeConfig, BridgeEvent, EventBus};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{reply_channel, DedicatedThreadExecutor, LocalHostChannel};

use core_engine::{EngineFactory, LocalCloud, LocalEngineFactory, StorageLocation};
use core_runtime::error::Error as RuntimeError;
use core_runtime::events::Receiver;

use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct BridgeService {
    dispatcher: Dispatcher,
    config: Arc<BridgeConfig>,
    events: EventBus,
}

impl BridgeService {
    pub fn builder() -> BridgeServiceBuilder {
        BridgeServiceBuilder::default()
    }

    /// Runs one host command and returns its envelope.
    pub async fn dispatch(&self, call: MethodCall) -> Envelope {
        self.dispatcher.dispatch(call).await
    }

    /// Runs one host command in the background and replies through `result`
    /// on the configured reply executor.
    pub fn handle(&self, call: MethodCall, result: Box<dyn MethodResult>) {
        self.dispatcher.handle(call, result);
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.dispatcher.registry()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Releases every session and rejects further `init` calls.
    pub async fn shutdown(&self) {
        self.registry().shutdown().await;
    }
}

/// Builder for [`BridgeService`]. A host channel and an engine factory are
/// required; everything else has defaults.
#[derive(Default)]
pub struct BridgeServiceBuilder {
    config: Option<BridgeConfig>,
    factory: Option<Arc<dyn EngineFactory>>,
    local_cloud: Option<Arc<LocalCloud>>,
    host: Option<Arc<dyn HostChannel>>,
    executor: Option<Arc<dyn ReplyExecutor>>,
    runtime: Option<Handle>,
}

impl BridgeServiceBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Uses the bundled local engine against `cloud`. Keys live under
    /// `BridgeConfig::storage_dir` when set, in memory otherwise.
    pub fn local_engine(mut self, cloud: Arc<LocalCloud>) -> Self {
        self.local_cloud = Some(cloud);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostChannel>) -> Self {
        self.host = Some(host);
        self
    }

    /// Context replies of [`BridgeService::handle`] are posted on. Defaults
    /// to [`InlineExecutor`].
    pub fn reply_executor(mut self, executor: Arc<dyn ReplyExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Runtime commands and token round trips run on. Defaults to the
    /// runtime the builder is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Errors
    ///
    /// - `Error::Config` when the configuration is invalid
    /// - `Error::CapabilityMissing` without a host channel, an engine factory
    ///   or a reachable tokio runtime
    pub fn build(self) -> core_runtime::Result<BridgeService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let host = self.host.ok_or_else(|| missing("host_channel", "A host channel is required"))?;
        let factory = match (self.factory, self.local_cloud) {
            (Some(factory), _) => factory,
            (None, Some(cloud)) => {
                let location = match &config.storage_dir {
                    Some(dir) => StorageLocation::Directory(dir.clone()),
                    None => StorageLocation::Memory,
                };
                Arc::new(LocalEngineFactory::new(cloud, location)) as Arc<dyn EngineFactory>
            }
            (None, None) => return Err(missing("engine_factory", "An engine factory is required")),
        };
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|err| missing("runtime", &format!("No tokio runtime available: {}", err)))?,
        };
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(InlineExecutor) as Arc<dyn ReplyExecutor>);

        let events = EventBus::new(config.event_buffer_size);
        let config = Arc::new(config);
        let registry = Arc::new(InstanceRegistry::new(factory, events.clone()));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::clone(&config),
            host,
            executor,
            events.clone(),
            runtime,
        );

        info!(channel = %config.channel_name, "Bridge service ready");
        Ok(BridgeService {
            dispatcher,
            config,
            events,
        })
    }
}

fn missing(capability: &str, message: &str) -> RuntimeError {
    RuntimeError::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::LocalHostChannel;

    #[tokio::test]
    async fn test_builder_requires_host_and_factory() {
        let err = BridgeService::builder()
            .local_engine(LocalCloud::new())
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RuntimeError::CapabilityMissing { ref capability, .. } if capability == "host_channel"
        ));

        let err = BridgeService::builder()
            .host(Arc::new(LocalHostChannel::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RuntimeError::CapabilityMissing { ref capability, .. } if capability == "engine_factory"
        ));
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let config = BridgeConfig {
            instance_id_key: String::new(),
            ..BridgeConfig::default()
        };
        let result = BridgeService::builder()
            .config(config)
            .host(Arc::new(LocalHostChannel::new()))
            .local_engine(LocalCloud::new())
            .build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_builder_requires_runtime() {
        let result = BridgeService::builder()
            .host(Arc::new(LocalHostChannel::new()))
            .local_engine(LocalCloud::new())
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::CapabilityMissing { ref capability, .. }) if capability == "runtime"
        ));
    }

    #[tokio::test]
    async fn test_custom_instance_id_key() {
        let config = BridgeConfig::builder()
            .instance_id_key("instanceId")
            .build()
            .unwrap();
        let service = BridgeService::builder()
            .config(config)
            .host(Arc::new(LocalHostChannel::new()))
            .local_engine(LocalCloud::new())
            .build()
            .unwrap();

        let envelope = service
            .dispatch(MethodCall::new("getIdentity", serde_json::json!({ "_id": "a" })))
            .await;
        assert_eq!(envelope.code(), Some("argument_not_found"));

        let envelope = service
            .dispatch(MethodCall::new(
                "init",
                serde_json::json!({ "instanceId": "a", "identity": "alice" }),
            ))
            .await;
        assert!(envelope.is_success());
        assert_eq!(service.registry().instance_ids().await, vec!["a".to_string()]);
        service.shutdown().await;
    }
}
