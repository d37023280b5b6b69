//! In-process host channel.

use async_trait::async_trait;
use bridge_traits::{
    channel::{ChannelReply, HostChannel},
    error::{BridgeError, Result},
};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type MethodHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ChannelReply> + Send + Sync>;

/// [`HostChannel`] whose host side is a set of Rust closures.
///
/// Calls to a method without a registered handler are answered with
/// [`ChannelReply::NotImplemented`], mirroring a host that does not implement
/// the method. After [`close`](Self::close) every call fails with
/// [`BridgeError::ChannelClosed`].
#[derive(Clone, Default)]
pub struct LocalHostChannel {
    handlers: Arc<RwLock<HashMap<String, MethodHandler>>>,
    closed: Arc<AtomicBool>,
    invocations: Arc<AtomicUsize>,
}

impl LocalHostChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler invoked for `method`, replacing any previous one.
    pub async fn register_handler<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ChannelReply> + Send + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.insert(
            method.to_string(),
            Arc::new(move |arguments| handler(arguments).boxed()),
        );
    }

    pub async fn unregister_handler(&self, method: &str) -> bool {
        self.handlers.write().await.remove(method).is_some()
    }

    /// Simulate the host tearing down the channel.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of calls that reached the channel, answered or not.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    async fn handler_for(&self, method: &str) -> Option<MethodHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(method).cloned()
    }
}

#[async_trait]
impl HostChannel for LocalHostChannel {
    async fn invoke_method(&self, method: &str, arguments: Value) -> Result<ChannelReply> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed(format!(
                "cannot deliver '{}'",
                method
            )));
        }

        match self.handler_for(method).await {
            Some(handler) => tokio::spawn(handler(arguments)).await.map_err(|err| {
                BridgeError::Transport(format!("handler for '{}' failed: {}", method, err))
            }),
            None => {
                debug!(method, "No host handler registered");
                Ok(ChannelReply::NotImplemented)
            }
        }
    }
}
