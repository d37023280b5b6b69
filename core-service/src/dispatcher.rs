//! # Dispatcher
//!
//! Single entry point for every host command.
//!
//! A call is checked in a fixed order: the instance id argument, then the
//! method name, then the session lookup (skipped for `init`), then the
//! per-method arguments. Only then is the engine touched. Every call resolves
//! to exactly one [`Envelope`].
//!
//! [`Dispatcher::handle`] adds the completion discipline for transports that
//! hand over a [`MethodResult`]: the command runs on the runtime and the reply
//! is posted through the configured [`ReplyExecutor`].

use crate::arguments::Arguments;
use crate::envelope::{Envelope, ErrorReply};
use crate::error::{Result, ServiceError};
use crate::method::{Method, SessionMethod};
use crate::registry::InstanceRegistry;
use crate::session::EngineSession;
use crate::translate::UNKNOWN_ERROR;

use bridge_traits::channel::{HostChannel, MethodCall, MethodResult};
use bridge_traits::executor::ReplyExecutor;
use core_auth::TokenCallbackBridge;
use core_engine::EngineParams;
use core_runtime::config::BridgeConfig;
use core_runtime::events::{BridgeEvent, CommandEvent, EventBus};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

const DROPPED_MESSAGE: &str = "Request was dropped before a reply was produced";

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
    config: Arc<BridgeConfig>,
    host: Arc<dyn HostChannel>,
    executor: Arc<dyn ReplyExecutor>,
    events: EventBus,
    runtime: Handle,
}

impl Dispatcher {
    /// # Arguments
    ///
    /// * `host` - Outbound channel used by the token bridges of new sessions
    /// * `executor` - Context replies from [`handle`](Self::handle) are posted on
    /// * `runtime` - Runtime commands and token round trips run on
    pub fn new(
        registry: Arc<InstanceRegistry>,
        config: Arc<BridgeConfig>,
        host: Arc<dyn HostChannel>,
        executor: Arc<dyn ReplyExecutor>,
        events: EventBus,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            config,
            host,
            executor,
            events,
            runtime,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Runs `call` to completion and returns its envelope.
    #[instrument(skip_all, fields(method = %call.method))]
    pub async fn dispatch(&self, call: MethodCall) -> Envelope {
        let args = Arguments::new(&call);
        let instance_id = args.optional_string(&self.config.instance_id_key);

        let outcome = match instance_id.as_deref() {
            Some(id) => self.route(id, &call.method, args).await,
            None => Err(ServiceError::argument(
                self.config.instance_id_key.clone(),
                "String",
            )),
        };

        let envelope = match outcome {
            Ok(value) => {
                debug!(instance_id = ?instance_id, "Command succeeded");
                Envelope::Success(value)
            }
            Err(error) => {
                let reply = error.to_reply();
                warn!(instance_id = ?instance_id, code = %reply.code, error = %error, "Command failed");
                Envelope::Failure(reply)
            }
        };

        let _ = self.events.emit(BridgeEvent::Command(CommandEvent::Completed {
            method: call.method.clone(),
            instance_id,
            error_code: envelope.code().map(str::to_string),
        }));
        envelope
    }

    /// Dispatches `call` on the runtime and replies through `result`.
    ///
    /// Returns immediately. The reply is posted on the reply executor exactly
    /// once, including when the command task panics or is torn down.
    pub fn handle(&self, call: MethodCall, result: Box<dyn MethodResult>) {
        let reply = ReplyHandle::new(result, Arc::clone(&self.executor));
        let dispatcher = self.clone();
        self.runtime.spawn(async move {
            let envelope = dispatcher.dispatch(call).await;
            reply.deliver(envelope);
        });
    }

    async fn route(&self, instance_id: &str, method: &str, args: Arguments<'_>) -> Result<Value> {
        match method.parse::<Method>()? {
            Method::Init => self.init(instance_id, args).await,
            Method::Session(method) => {
                let session = self
                    .registry
                    .get(instance_id)
                    .await
                    .ok_or_else(|| ServiceError::NotInitialized {
                        instance_id: instance_id.to_string(),
                    })?;
                self.invoke(&session, method, args).await
            }
        }
    }

    async fn init(&self, instance_id: &str, args: Arguments<'_>) -> Result<Value> {
        let identity = args.string("identity")?;
        let enable_ratchet = args
            .optional_bool("enableRatchet")
            .unwrap_or(self.config.enable_ratchet);

        let token_provider = TokenCallbackBridge::new(
            instance_id,
            Arc::clone(&self.host),
            self.runtime.clone(),
            &self.config,
        )
        .with_events(self.events.clone());

        let params = EngineParams {
            identity,
            token_provider: Arc::new(token_provider),
            enable_ratchet,
        };
        self.registry.create(instance_id, params).await?;
        Ok(Value::Bool(true))
    }

    async fn invoke(&self, session: &EngineSession, method: SessionMethod, args: Arguments<'_>) -> Result<Value> {
        let done = Value::Bool(true);
        let value = match method {
            SessionMethod::Dispose => Value::Bool(self.registry.remove(session.instance_id()).await),
            SessionMethod::GetIdentity => Value::from(session.identity()),
            SessionMethod::HasLocalPrivateKey => Value::Bool(session.has_local_private_key().await?),
            SessionMethod::Register => {
                session.register().await?;
                done
            }
            SessionMethod::RotatePrivateKey => {
                session.rotate_private_key().await?;
                done
            }
            SessionMethod::CleanUp => {
                session.clean_up().await?;
                done
            }
            SessionMethod::FindUsers => {
                let identities = args.string_list("identities")?;
                let cards = session.find_users(identities).await?;
                Value::Object(
                    cards
                        .into_iter()
                        .map(|(identity, card)| (identity, Value::String(card)))
                        .collect(),
                )
            }
            SessionMethod::Encrypt => {
                let text = args.string("text")?;
                Value::String(session.encrypt(text, args.optional_string_map("users")).await?)
            }
            SessionMethod::Decrypt => {
                let text = args.string("text")?;
                Value::String(session.decrypt(text, args.optional_string("user")).await?)
            }
            SessionMethod::BackupPrivateKey => {
                session.backup_private_key(args.string("password")?).await?;
                done
            }
            SessionMethod::ResetPrivateKeyBackup => {
                session.reset_private_key_backup().await?;
                done
            }
            SessionMethod::ChangePassword => {
                let old_password = args.string("oldPassword")?;
                let new_password = args.string("newPassword")?;
                session.change_password(old_password, new_password).await?;
                done
            }
            SessionMethod::RestorePrivateKey => {
                session.restore_private_key(args.string("password")?).await?;
                done
            }
            SessionMethod::Unregister => {
                session.unregister().await?;
                done
            }
            SessionMethod::CreateRatchetChannel => {
                session.create_ratchet_channel(args.string("identity")?).await?;
                done
            }
            SessionMethod::JoinRatchetChannel => {
                session.join_ratchet_channel(args.string("identity")?).await?;
                done
            }
            SessionMethod::HasRatchetChannel => {
                Value::Bool(session.has_ratchet_channel(&args.string("identity")?))
            }
            SessionMethod::GetRatchetChannel => {
                Value::Bool(session.get_ratchet_channel(args.string("identity")?).await?)
            }
            SessionMethod::DeleteRatchetChannel => {
                session.delete_ratchet_channel(args.string("identity")?).await?;
                done
            }
            SessionMethod::RatchetEncrypt => {
                let peer = args.string("identity")?;
                let message = args.string("message")?;
                Value::String(session.ratchet_encrypt(&peer, message).await?)
            }
            SessionMethod::RatchetDecrypt => {
                let peer = args.string("identity")?;
                let message = args.string("message")?;
                Value::String(session.ratchet_decrypt(&peer, message).await?)
            }
            SessionMethod::RatchetDecryptMultiple => {
                let peer = args.string("identity")?;
                let messages = args.string_list("messages")?;
                Value::from(session.ratchet_decrypt_multiple(&peer, messages).await?)
            }
        };
        Ok(value)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Owns the host's reply sink until exactly one envelope has been posted.
///
/// Dropping an undelivered handle posts an `unknown_error` failure.
pub struct ReplyHandle {
    pending: Option<(Box<dyn MethodResult>, Arc<dyn ReplyExecutor>)>,
}

impl ReplyHandle {
    pub fn new(result: Box<dyn MethodResult>, executor: Arc<dyn ReplyExecutor>) -> Self {
        Self {
            pending: Some((result, executor)),
        }
    }

    pub fn deliver(mut self, envelope: Envelope) {
        self.post(envelope);
    }

    fn post(&mut self, envelope: Envelope) {
        if let Some((result, executor)) = self.pending.take() {
            executor.execute(Box::new(move || envelope.deliver_to(result)));
        }
    }
}

impl Drop for ReplyHandle {
    fn drop(&mut self) {
        if self.pending.is_some() {
            warn!("Reply handle dropped without a reply");
            self.post(Envelope::Failure(ErrorReply::new(UNKNOWN_ERROR, DROPPED_MESSAGE)));
        }
    }
}
