//! # Token-Callback Bridge
//!
//! Turns the engine's synchronous "give me a token" call into an asynchronous
//! request to the host.
//!
//! ## Overview
//!
//! The engine runs on a blocking worker and calls
//! [`TokenProvider::get_token`]. The bridge then:
//!
//! 1. creates a [`PendingTokenRequest`](crate::pending::PendingTokenRequest)
//!    for the instance,
//! 2. spawns the host round trip (`tokenCallback` with `{ "_id": <id> }`) on
//!    the runtime captured at `init` time,
//! 3. blocks the worker on the completion slot.
//!
//! The reply is processed by a runtime task, never by the blocked worker, so
//! the wait cannot starve the path that completes it. A configured timeout
//! completes the slot with [`TokenError::Timeout`]. There is no retry.
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::TokenCallbackBridge;
//!
//! let bridge = TokenCallbackBridge::new("a", channel, tokio::runtime::Handle::current(), &config)
//!     .with_events(event_bus.clone());
//!
//! // from a blocking worker:
//! let token = tokio::task::spawn_blocking(move || bridge.get_token()).await??;
//! ```

use crate::error::{Result, TokenError};
use crate::pending::pending_request;
use crate::provider::TokenProvider;

use bridge_traits::channel::{ChannelReply, HostChannel};
use core_runtime::config::BridgeConfig;
use core_runtime::events::{BridgeEvent, EventBus, TokenEvent};
use core_runtime::logging::redact_if_sensitive;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

/// Per-instance token provider backed by the host channel.
pub struct TokenCallbackBridge {
    instance_id: String,
    channel: Arc<dyn HostChannel>,
    runtime: Handle,
    method: String,
    instance_id_key: String,
    timeout: Option<Duration>,
    events: Option<EventBus>,
}

impl TokenCallbackBridge {
    /// Creates a bridge for `instance_id`.
    ///
    /// # Arguments
    ///
    /// * `channel` - Outbound half of the host method channel
    /// * `runtime` - Runtime the host round trips are spawned on
    /// * `config` - Supplies the callback method, the id key and the timeout
    pub fn new(
        instance_id: impl Into<String>,
        channel: Arc<dyn HostChannel>,
        runtime: Handle,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            channel,
            runtime,
            method: config.token_callback_method.clone(),
            instance_id_key: config.instance_id_key.clone(),
            timeout: config.token_timeout,
            events: None,
        }
    }

    /// Publishes `TokenEvent`s for every request on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Performs the round trip without blocking.
    ///
    /// # Errors
    ///
    /// See [`TokenError`] for the possible outcomes.
    pub async fn request_token(&self) -> Result<String> {
        exchange(
            Arc::clone(&self.channel),
            self.method.clone(),
            self.request_arguments(),
            self.timeout,
        )
        .await
    }

    fn request_arguments(&self) -> Value {
        let mut arguments = Map::new();
        arguments.insert(
            self.instance_id_key.clone(),
            Value::String(self.instance_id.clone()),
        );
        Value::Object(arguments)
    }

    fn emit(&self, event: TokenEvent) {
        if let Some(events) = &self.events {
            let _ = events.emit(BridgeEvent::Token(event));
        }
    }
}

impl TokenProvider for TokenCallbackBridge {
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    fn get_token(&self) -> Result<String> {
        let (pending, completer) = pending_request(self.instance_id.clone());
        let request_id = pending.request_id().to_string();

        debug!(%request_id, method = %self.method, "Requesting token from host");
        self.emit(TokenEvent::Requested {
            instance_id: self.instance_id.clone(),
            request_id: request_id.clone(),
        });

        let channel = Arc::clone(&self.channel);
        let method = self.method.clone();
        let arguments = self.request_arguments();
        let timeout = self.timeout;

        // A runtime that already shut down drops the task, and with it the
        // completer, so the wait below ends with `Abandoned`.
        self.runtime.spawn(async move {
            let outcome = exchange(channel, method, arguments, timeout).await;
            completer.complete(outcome);
        });

        let outcome = pending.wait();

        match &outcome {
            Ok(token) => {
                debug!(
                    %request_id,
                    token = %redact_if_sensitive("token", token),
                    "Token delivered by host"
                );
                self.emit(TokenEvent::Resolved {
                    instance_id: self.instance_id.clone(),
                    request_id,
                });
            }
            Err(error) => {
                warn!(%request_id, reason = error.reason(), error = %error, "Token request failed");
                self.emit(TokenEvent::Failed {
                    instance_id: self.instance_id.clone(),
                    request_id,
                    reason: error.reason().to_string(),
                });
            }
        }

        outcome
    }
}

impl fmt::Debug for TokenCallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCallbackBridge")
            .field("instance_id", &self.instance_id)
            .field("method", &self.method)
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn exchange(
    channel: Arc<dyn HostChannel>,
    method: String,
    arguments: Value,
    timeout: Option<Duration>,
) -> Result<String> {
    let call = channel.invoke_method(&method, arguments);

    let reply = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(reply) => reply,
            Err(_) => return Err(TokenError::Timeout(limit)),
        },
        None => call.await,
    };

    match reply {
        Ok(ChannelReply::Success {
            value: Value::String(token),
        }) => Ok(token),
        Ok(ChannelReply::Success { .. }) => Err(TokenError::InvalidToken),
        Ok(ChannelReply::Error { code, message, .. }) => Err(TokenError::Host { code, message }),
        Ok(ChannelReply::NotImplemented) => Err(TokenError::NotImplemented { method }),
        Err(error) => Err(TokenError::Transport(error.to_string())),
    }
}
