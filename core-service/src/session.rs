//! # Engine Session
//!
//! One initialized engine bound to one instance id.
//!
//! ## Overview
//!
//! The session adapts the [`CryptoEngine`] surface to the shapes carried by
//! the channel (strings, string lists, string maps) and owns the in-memory
//! map of ratchet channel handles for that instance.
//!
//! - every engine call except `identity` runs on the blocking pool
//! - mutating calls of one session are serialized by a per-session mutex
//! - ratchet message operations only consult the handle map, they never
//!   resolve a channel on their own

use crate::error::{Result, ServiceError};

use core_engine::{Card, CryptoEngine, FindUsersResult, RatchetChannel};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct EngineSession {
    instance_id: String,
    identity: String,
    engine: Arc<dyn CryptoEngine>,
    channels: RwLock<HashMap<String, Arc<dyn RatchetChannel>>>,
    mutation: Mutex<()>,
    released: AtomicBool,
}

impl EngineSession {
    pub fn new(instance_id: impl Into<String>, engine: Arc<dyn CryptoEngine>) -> Self {
        Self {
            instance_id: instance_id.into(),
            identity: engine.identity(),
            engine,
            channels: RwLock::new(HashMap::new()),
            mutation: Mutex::new(()),
            released: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Peers with a recorded channel handle, sorted.
    pub fn channel_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.channels.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Drops every channel handle and closes the engine. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channels.write().clear();
        self.engine.close();
        info!(instance_id = %self.instance_id, "Session released");
    }

    /// Runs `op` against the engine on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn CryptoEngine) -> core_engine::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        blocking(move || op(engine.as_ref())).await
    }

    pub async fn has_local_private_key(&self) -> Result<bool> {
        self.run(|engine| engine.has_local_private_key()).await
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn register(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(|engine| engine.register()).await
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn rotate_private_key(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(|engine| engine.rotate_private_key()).await
    }

    /// Deletes local key material. The engine wipes its ratchet state too, so
    /// the handle map is cleared as well.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn clean_up(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(|engine| engine.cleanup()).await?;
        self.channels.write().clear();
        Ok(())
    }

    /// Looks up cards and exports them to their transport form.
    pub async fn find_users(&self, identities: Vec<String>) -> Result<BTreeMap<String, String>> {
        self.run(move |engine| {
            let found = engine.find_users(&identities)?;
            found
                .iter()
                .map(|(identity, card)| {
                    engine
                        .export_card(card)
                        .map(|raw| (identity.clone(), raw))
                })
                .collect()
        })
        .await
    }

    pub async fn encrypt(
        &self,
        text: String,
        users: Option<HashMap<String, String>>,
    ) -> Result<String> {
        self.run(move |engine| {
            let recipients = match users {
                Some(users) => {
                    let mut cards = FindUsersResult::with_capacity(users.len());
                    for (identity, raw) in users {
                        cards.insert(identity, engine.import_card(&raw)?);
                    }
                    Some(cards)
                }
                None => None,
            };
            engine.encrypt(&text, recipients)
        })
        .await
    }

    pub async fn decrypt(&self, text: String, user: Option<String>) -> Result<String> {
        self.run(move |engine| {
            let sender = user.map(|raw| engine.import_card(&raw)).transpose()?;
            engine.auth_decrypt(&text, sender)
        })
        .await
    }

    #[instrument(skip_all, fields(instance_id = %self.instance_id))]
    pub async fn backup_private_key(&self, password: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(move |engine| engine.backup_private_key(&password))
            .await
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn reset_private_key_backup(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(|engine| engine.reset_private_key_backup()).await
    }

    #[instrument(skip_all, fields(instance_id = %self.instance_id))]
    pub async fn change_password(&self, old_password: String, new_password: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(move |engine| engine.change_password(&old_password, &new_password))
            .await
    }

    #[instrument(skip_all, fields(instance_id = %self.instance_id))]
    pub async fn restore_private_key(&self, password: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(move |engine| engine.restore_private_key(&password))
            .await
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn unregister(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.run(|engine| engine.unregister()).await?;
        self.channels.write().clear();
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn create_ratchet_channel(&self, peer: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let channel = self
            .with_peer_card(peer.clone(), |engine, card| engine.create_ratchet_channel(card))
            .await?;
        self.record(peer, channel);
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn join_ratchet_channel(&self, peer: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let channel = self
            .with_peer_card(peer.clone(), |engine, card| engine.join_ratchet_channel(card))
            .await?;
        self.record(peer, channel);
        Ok(())
    }

    /// Map lookup only.
    pub fn has_ratchet_channel(&self, peer: &str) -> bool {
        self.channels.read().contains_key(peer)
    }

    /// Resolves a channel the engine has persisted and records its handle.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn get_ratchet_channel(&self, peer: String) -> Result<bool> {
        let _guard = self.mutation.lock().await;
        let channel = self
            .with_peer_card(peer.clone(), |engine, card| engine.get_ratchet_channel(card))
            .await?;
        match channel {
            Some(channel) => {
                self.record(peer, channel);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes the handle only after the engine deleted the channel.
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn delete_ratchet_channel(&self, peer: String) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.with_peer_card(peer.clone(), |engine, card| engine.delete_ratchet_channel(card))
            .await?;
        if self.channels.write().remove(&peer).is_some() {
            debug!(%peer, "Ratchet channel handle removed");
        }
        Ok(())
    }

    pub async fn ratchet_encrypt(&self, peer: &str, message: String) -> Result<String> {
        let channel = self.channel(peer)?;
        let _guard = self.mutation.lock().await;
        blocking(move || channel.encrypt(&message)).await
    }

    pub async fn ratchet_decrypt(&self, peer: &str, message: String) -> Result<String> {
        let channel = self.channel(peer)?;
        let _guard = self.mutation.lock().await;
        blocking(move || channel.decrypt(&message)).await
    }

    /// All-or-nothing batch decryption.
    pub async fn ratchet_decrypt_multiple(
        &self,
        peer: &str,
        messages: Vec<String>,
    ) -> Result<Vec<String>> {
        let channel = self.channel(peer)?;
        let _guard = self.mutation.lock().await;
        blocking(move || channel.decrypt_multiple(&messages)).await
    }

    fn channel(&self, peer: &str) -> Result<Arc<dyn RatchetChannel>> {
        self.channels
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| ServiceError::ChannelNotFound {
                peer: peer.to_string(),
            })
    }

    fn record(&self, peer: String, channel: Arc<dyn RatchetChannel>) {
        if self.is_released() {
            warn!(%peer, "Session released while resolving a channel; handle dropped");
            return;
        }
        self.channels.write().insert(peer, channel);
    }

    /// Resolves the peer's card with `find_users`, then runs `op` with it.
    async fn with_peer_card<T, F>(&self, peer: String, op: F) -> Result<T>
    where
        F: FnOnce(&dyn CryptoEngine, &Card) -> core_engine::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        blocking(move || -> std::result::Result<T, PeerLookup> {
            let mut found = engine.find_users(std::slice::from_ref(&peer))?;
            let card = found
                .remove(&peer)
                .ok_or(PeerLookup::Missing(peer))?;
            Ok(op(engine.as_ref(), &card)?)
        })
        .await
    }
}

/// Outcome of a blocking call that may also report a missing peer card.
enum PeerLookup {
    Missing(String),
    Engine(core_engine::EngineError),
}

impl From<core_engine::EngineError> for PeerLookup {
    fn from(error: core_engine::EngineError) -> Self {
        PeerLookup::Engine(error)
    }
}

impl From<PeerLookup> for ServiceError {
    fn from(lookup: PeerLookup) -> Self {
        match lookup {
            PeerLookup::Missing(identity) => ServiceError::UserNotFound { identity },
            PeerLookup::Engine(error) => ServiceError::Engine(error),
        }
    }
}

/// Runs a synchronous engine call on the blocking pool.
async fn blocking<T, E, F>(op: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ServiceError> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(outcome) => outcome.map_err(Into::into),
        Err(join) if join.is_panic() => Err(ServiceError::Worker(
            "Engine call panicked".to_string(),
        )),
        Err(join) => Err(ServiceError::Worker(join.to_string())),
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("instance_id", &self.instance_id)
            .field("identity", &self.identity)
            .field("channels", &self.channel_peers())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_engine::{EngineError, MockCryptoEngine, MockRatchetChannel};
    use mockall::predicate::eq;

    fn card(identity: &str) -> Card {
        Card {
            id: format!("{}-card", identity),
            identity: identity.to_string(),
            exchange_key: String::new(),
            signing_key: String::new(),
            ratchet_enabled: true,
            previous_card_id: None,
            created_at: chrono::Utc::now(),
            signature: String::new(),
        }
    }

    fn engine() -> MockCryptoEngine {
        let mut engine = MockCryptoEngine::new();
        engine
            .expect_identity()
            .return_const("alice".to_string());
        engine
    }

    fn expect_peer(engine: &mut MockCryptoEngine, peer: &'static str) {
        engine
            .expect_find_users()
            .returning(move |ids| {
                Ok(ids
                    .iter()
                    .filter(|id| id.as_str() == peer)
                    .map(|id| (id.clone(), card(id)))
                    .collect())
            });
    }

    fn session(engine: MockCryptoEngine) -> EngineSession {
        EngineSession::new("a", Arc::new(engine))
    }

    #[tokio::test]
    async fn test_ratchet_ops_need_recorded_handle() {
        let session = session(engine());

        let err = session
            .ratchet_encrypt("bob", "hi".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ChannelNotFound { ref peer } if peer == "bob"));
        assert_eq!(err.code(), "ratchet_channel_not_found");

        assert!(session.ratchet_decrypt("bob", "x".to_string()).await.is_err());
        assert!(session
            .ratchet_decrypt_multiple("bob", vec!["x".to_string()])
            .await
            .is_err());
        assert!(!session.has_ratchet_channel("bob"));
    }

    #[tokio::test]
    async fn test_create_records_handle() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine
            .expect_create_ratchet_channel()
            .withf(|card| card.identity == "bob")
            .times(1)
            .returning(|_| {
                let mut channel = MockRatchetChannel::new();
                channel
                    .expect_encrypt()
                    .with(eq("hi"))
                    .returning(|text| Ok(format!("enc({})", text)));
                Ok(Arc::new(channel) as Arc<dyn RatchetChannel>)
            });
        let session = session(engine);

        session.create_ratchet_channel("bob".to_string()).await.unwrap();

        assert!(session.has_ratchet_channel("bob"));
        assert_eq!(
            session.ratchet_encrypt("bob", "hi".to_string()).await.unwrap(),
            "enc(hi)"
        );
    }

    #[tokio::test]
    async fn test_missing_peer_card_is_user_not_found() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine.expect_join_ratchet_channel().never();
        let session = session(engine);

        let err = session
            .join_ratchet_channel("carol".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserNotFound { ref identity } if identity == "carol"));
        assert_eq!(err.code(), "user_not_found");
    }

    #[tokio::test]
    async fn test_get_records_only_found_channels() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine
            .expect_get_ratchet_channel()
            .returning(|_| Ok(None));
        let session = session(engine);

        assert!(!session.get_ratchet_channel("bob".to_string()).await.unwrap());
        assert!(!session.has_ratchet_channel("bob"));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_handle() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine
            .expect_get_ratchet_channel()
            .returning(|_| Ok(Some(Arc::new(MockRatchetChannel::new()) as Arc<dyn RatchetChannel>)));
        let mut attempts = 0;
        engine
            .expect_delete_ratchet_channel()
            .times(2)
            .returning(move |_| {
                attempts += 1;
                if attempts == 1 {
                    Err(EngineError::protocol("directory unavailable"))
                } else {
                    Ok(())
                }
            });
        let session = session(engine);

        assert!(session.get_ratchet_channel("bob".to_string()).await.unwrap());
        assert!(session.delete_ratchet_channel("bob".to_string()).await.is_err());
        assert!(session.has_ratchet_channel("bob"));

        session.delete_ratchet_channel("bob".to_string()).await.unwrap();
        assert!(!session.has_ratchet_channel("bob"));
    }

    #[tokio::test]
    async fn test_decrypt_multiple_failure_returns_no_partial_list() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine.expect_get_ratchet_channel().returning(|_| {
            let mut channel = MockRatchetChannel::new();
            channel
                .expect_decrypt_multiple()
                .returning(|_| Err(EngineError::protocol("Failed to decrypt ratchet message")));
            Ok(Some(Arc::new(channel) as Arc<dyn RatchetChannel>))
        });
        let session = session(engine);
        session.get_ratchet_channel("bob".to_string()).await.unwrap();

        let err = session
            .ratchet_decrypt_multiple("bob", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "protocol_exception");
    }

    #[tokio::test]
    async fn test_find_users_exports_cards() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine
            .expect_export_card()
            .returning(|card| Ok(format!("exported:{}", card.identity)));
        let session = session(engine);

        let found = session.find_users(vec!["bob".to_string()]).await.unwrap();
        assert_eq!(found.get("bob").map(String::as_str), Some("exported:bob"));
    }

    #[tokio::test]
    async fn test_encrypt_imports_recipient_cards() {
        let mut engine = engine();
        engine
            .expect_import_card()
            .with(eq("raw-bob"))
            .returning(|_| Ok(card("bob")));
        engine
            .expect_encrypt()
            .withf(|text, recipients| {
                text.to_string() == "hi" && recipients.as_ref().map(|r| r.contains_key("bob")) == Some(true)
            })
            .returning(|_, _| Ok("sealed".to_string()));
        let session = session(engine);

        let users = HashMap::from([("bob".to_string(), "raw-bob".to_string())]);
        assert_eq!(
            session.encrypt("hi".to_string(), Some(users)).await.unwrap(),
            "sealed"
        );
    }

    #[tokio::test]
    async fn test_clean_up_clears_handles() {
        let mut engine = engine();
        expect_peer(&mut engine, "bob");
        engine
            .expect_get_ratchet_channel()
            .returning(|_| Ok(Some(Arc::new(MockRatchetChannel::new()) as Arc<dyn RatchetChannel>)));
        engine.expect_cleanup().times(1).returning(|| Ok(()));
        let session = session(engine);

        session.get_ratchet_channel("bob".to_string()).await.unwrap();
        session.clean_up().await.unwrap();
        assert!(session.channel_peers().is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let mut engine = engine();
        engine.expect_close().times(1).return_const(());
        let session = session(engine);

        session.release();
        session.release();
        assert!(session.is_released());
    }

    #[tokio::test]
    async fn test_panicking_call_becomes_worker_error() {
        let err = blocking(|| -> core_engine::Result<()> { panic!("engine bug") })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Worker(_)));
        assert_eq!(err.code(), "unknown_error");
    }
}
