//! # Local Engine
//!
//! Self-contained [`CryptoEngine`] backed by an in-process key directory.
//!
//! ## Overview
//!
//! [`LocalEngine`] implements the complete engine surface without a network
//! service: cards, key backups and ratchet invitations live in a shared
//! [`LocalCloud`], private material lives in per-identity [`KeyStorage`].
//! Every directory call first asks the token provider for a token, so the
//! host token round trip is exercised exactly as with a remote directory.
//!
//! ## Usage
//!
//! ```ignore
//! use core_engine::local::{LocalCloud, LocalEngineFactory};
//!
//! let factory = LocalEngineFactory::in_memory(LocalCloud::new());
//! let engine = factory.create(params)?;
//! engine.register()?;
//! ```

mod cloud;
pub(crate) mod crypto;
mod message;
mod ratchet;

pub use cloud::LocalCloud;
pub use ratchet::LocalRatchetChannel;

use crate::card::Card;
use crate::engine::{CryptoEngine, EngineFactory, EngineParams, FindUsersResult, RatchetChannel};
use crate::error::{messages, EngineError, Result};
use crate::storage::{FileKeyStorage, KeyStorage, MemoryKeyStorage};
use cloud::{Invitation, KeyBackup};
use crypto::IdentityKeys;
use ratchet::ChannelState;

use chrono::Utc;
use core_auth::TokenProvider;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use x25519_dalek::PublicKey;

const PRIVATE_KEY_ENTRY: &str = "private_key";
const CARD_ENTRY: &str = "card";
const BACKUP_SALT_LEN: usize = 16;

/// Where engines built by a [`LocalEngineFactory`] keep their key storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// Process memory, shared by every engine of the same identity.
    Memory,
    /// One sub-directory per identity below this path.
    Directory(PathBuf),
}

pub struct LocalEngineFactory {
    cloud: Arc<LocalCloud>,
    location: StorageLocation,
    memory: Mutex<HashMap<String, Arc<MemoryKeyStorage>>>,
}

impl LocalEngineFactory {
    pub fn new(cloud: Arc<LocalCloud>, location: StorageLocation) -> Self {
        Self {
            cloud,
            location,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(cloud: Arc<LocalCloud>) -> Self {
        Self::new(cloud, StorageLocation::Memory)
    }

    pub fn cloud(&self) -> &Arc<LocalCloud> {
        &self.cloud
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    fn storage_for(&self, identity: &str) -> Result<Arc<dyn KeyStorage>> {
        match &self.location {
            StorageLocation::Memory => {
                let storage = self
                    .memory
                    .lock()
                    .entry(identity.to_string())
                    .or_default()
                    .clone();
                Ok(storage)
            }
            StorageLocation::Directory(root) => {
                let storage = FileKeyStorage::open(root.join(hex::encode(identity.as_bytes())))?;
                Ok(Arc::new(storage))
            }
        }
    }
}

impl EngineFactory for LocalEngineFactory {
    fn create(&self, params: EngineParams) -> Result<Arc<dyn CryptoEngine>> {
        if params.identity.is_empty() {
            return Err(EngineError::registration("Identity must not be empty"));
        }
        let storage = self.storage_for(&params.identity)?;
        let engine = LocalEngine::new(params, self.cloud.clone(), storage);
        Ok(Arc::new(engine))
    }
}

impl fmt::Debug for LocalEngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEngineFactory")
            .field("location", &self.location)
            .finish()
    }
}

pub struct LocalEngine {
    identity: String,
    token_provider: Arc<dyn TokenProvider>,
    enable_ratchet: bool,
    cloud: Arc<LocalCloud>,
    storage: Arc<dyn KeyStorage>,
    keys: RwLock<Option<Arc<IdentityKeys>>>,
    channels: Mutex<HashMap<String, Arc<LocalRatchetChannel>>>,
}

impl LocalEngine {
    pub fn new(params: EngineParams, cloud: Arc<LocalCloud>, storage: Arc<dyn KeyStorage>) -> Self {
        Self {
            identity: params.identity,
            token_provider: params.token_provider,
            enable_ratchet: params.enable_ratchet,
            cloud,
            storage,
            keys: RwLock::new(None),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches a token and presents it to the directory.
    fn authorize(&self) -> Result<()> {
        let token = self.token_provider.get_token()?;
        self.cloud.authorize(&self.identity, &token)
    }

    fn local_keys(&self) -> Result<Option<Arc<IdentityKeys>>> {
        if let Some(keys) = self.keys.read().as_ref() {
            return Ok(Some(keys.clone()));
        }
        let Some(bytes) = self.storage.load(PRIVATE_KEY_ENTRY)? else {
            return Ok(None);
        };
        let keys = Arc::new(IdentityKeys::from_bytes(&bytes)?);
        *self.keys.write() = Some(keys.clone());
        Ok(Some(keys))
    }

    fn require_keys(&self) -> Result<Arc<IdentityKeys>> {
        self.local_keys()?
            .ok_or_else(|| EngineError::registration(messages::MISSING_PRIVATE_KEY))
    }

    fn ensure_no_local_key(&self) -> Result<()> {
        if self.has_local_private_key()? {
            return Err(EngineError::registration(messages::PRIVATE_KEY_EXISTS));
        }
        Ok(())
    }

    fn save_local(&self, keys: IdentityKeys, card: Option<&Card>) -> Result<()> {
        self.storage.store(PRIVATE_KEY_ENTRY, &keys.to_bytes()?)?;
        if let Some(card) = card {
            self.storage.store(CARD_ENTRY, card.export()?.as_bytes())?;
        }
        *self.keys.write() = Some(Arc::new(keys));
        Ok(())
    }

    fn self_card(&self) -> Result<Option<Card>> {
        let Some(bytes) = self.storage.load(CARD_ENTRY)? else {
            return Ok(None);
        };
        let raw = String::from_utf8(bytes.to_vec())
            .map_err(|_| EngineError::key_storage("Stored card is not valid UTF-8"))?;
        Card::import(&raw).map(Some)
    }

    /// Removes the private key, the self card and every ratchet session.
    fn wipe_local(&self) -> Result<()> {
        self.storage.delete(PRIVATE_KEY_ENTRY)?;
        self.storage.delete(CARD_ENTRY)?;
        let removed = self.storage.delete_prefixed(ratchet::STORAGE_PREFIX)?;
        *self.keys.write() = None;
        self.channels.lock().clear();
        debug!(identity = %self.identity, ratchet_sessions = removed, "Local key material wiped");
        Ok(())
    }

    fn seal_backup(&self, keys: &IdentityKeys, password: &str) -> Result<KeyBackup> {
        let mut salt = [0u8; BACKUP_SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let wrapping = crypto::password_key(password, &salt)?;
        let sealed = crypto::seal(&wrapping, &keys.to_bytes()?, self.identity.as_bytes())?;
        Ok(KeyBackup {
            salt: crypto::encode(&salt),
            sealed: crypto::encode(&sealed),
        })
    }

    fn open_backup(&self, backup: &KeyBackup, password: &str) -> Result<IdentityKeys> {
        let salt = crypto::decode(&backup.salt, "backup salt")?;
        let sealed = crypto::decode(&backup.sealed, "backup")?;
        let wrapping = crypto::password_key(password, &salt)?;
        let bytes = crypto::open(&wrapping, &sealed, self.identity.as_bytes())
            .ok_or_else(|| EngineError::key_storage(messages::WRONG_PASSWORD))?;
        IdentityKeys::from_bytes(&bytes)
    }

    fn fetch_backup(&self) -> Result<KeyBackup> {
        self.cloud
            .backup(&self.identity)
            .ok_or_else(|| EngineError::key_storage(messages::BACKUP_NOT_FOUND))
    }

    /// Preconditions shared by channel creation and joining.
    fn check_channel_peer(&self, card: &Card) -> Result<()> {
        if !self.enable_ratchet {
            return Err(EngineError::ratchet(messages::RATCHET_NOT_ENABLED));
        }
        if card.identity == self.identity {
            return Err(EngineError::ratchet(messages::RATCHET_CHANNEL_WITH_SELF));
        }
        if !card.ratchet_enabled {
            return Err(EngineError::ratchet(messages::RATCHET_NOT_ENABLED_FOR_USER));
        }
        if self.channels.lock().contains_key(&card.identity)
            || self.storage.exists(&ratchet::storage_entry(&card.identity))?
        {
            return Err(EngineError::ratchet(messages::RATCHET_CHANNEL_EXISTS));
        }
        Ok(())
    }

    fn open_channel(&self, state: ChannelState, peer: &str) -> Result<Arc<dyn RatchetChannel>> {
        state.save(self.storage.as_ref())?;
        let channel = Arc::new(LocalRatchetChannel::new(state, self.storage.clone()));
        self.channels.lock().insert(peer.to_string(), channel.clone());
        Ok(channel)
    }
}

fn peer_public_key(card: &Card) -> Result<PublicKey> {
    Ok(PublicKey::from(card.exchange_public_key()?))
}

/// Root secret of a ratchet channel between `from` (initiator) and `to`.
fn handshake_root(
    ephemeral_part: &[u8; 32],
    static_part: &[u8; 32],
    from: &str,
    to: &str,
) -> Result<zeroize::Zeroizing<[u8; 32]>> {
    let mut ikm = zeroize::Zeroizing::new([0u8; 64]);
    ikm[..32].copy_from_slice(ephemeral_part);
    ikm[32..].copy_from_slice(static_part);
    crypto::derive_key(&ikm[..], "ratchet/root", format!("{}->{}", from, to).as_bytes())
}

impl CryptoEngine for LocalEngine {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn has_local_private_key(&self) -> Result<bool> {
        if self.keys.read().is_some() {
            return Ok(true);
        }
        self.storage.exists(PRIVATE_KEY_ENTRY)
    }

    #[instrument(skip(self), fields(identity = %self.identity))]
    fn register(&self) -> Result<()> {
        self.authorize()?;
        if self.cloud.card(&self.identity).is_some() {
            return Err(EngineError::registration(messages::USER_ALREADY_REGISTERED));
        }
        self.ensure_no_local_key()?;

        let keys = IdentityKeys::generate();
        let card = keys.issue_card(&self.identity, self.enable_ratchet, None);
        self.cloud.publish_card(card.clone())?;
        self.save_local(keys, Some(&card))?;
        info!(card_id = %card.id, "Identity registered");
        Ok(())
    }

    #[instrument(skip(self), fields(identity = %self.identity))]
    fn rotate_private_key(&self) -> Result<()> {
        self.ensure_no_local_key()?;
        self.authorize()?;
        let current = self
            .cloud
            .card(&self.identity)
            .ok_or_else(|| EngineError::registration(messages::USER_NOT_REGISTERED))?;

        let keys = IdentityKeys::generate();
        let card = keys.issue_card(&self.identity, self.enable_ratchet, Some(current.id));
        self.cloud.publish_card(card.clone())?;
        self.save_local(keys, Some(&card))?;
        info!(card_id = %card.id, "Private key rotated");
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        self.wipe_local()
    }

    fn find_users(&self, identities: &[String]) -> Result<FindUsersResult> {
        if identities.is_empty() {
            return Ok(FindUsersResult::new());
        }
        self.authorize()?;

        let mut found = FindUsersResult::with_capacity(identities.len());
        for identity in identities {
            let card = self
                .cloud
                .card(identity)
                .ok_or_else(|| EngineError::registration(messages::USERS_NOT_FOUND))?;
            found.insert(identity.clone(), card);
        }
        Ok(found)
    }

    fn encrypt(&self, text: &str, recipients: Option<FindUsersResult>) -> Result<String> {
        let keys = self.require_keys()?;
        let mut public_keys = vec![keys.exchange_public()];
        for card in recipients.iter().flat_map(|cards| cards.values()) {
            let key = peer_public_key(card)?;
            if !public_keys.contains(&key) {
                public_keys.push(key);
            }
        }
        message::encrypt(&keys, &public_keys, text)
    }

    fn auth_decrypt(&self, text: &str, sender: Option<Card>) -> Result<String> {
        let keys = self.require_keys()?;
        let sender = match sender {
            Some(card) => card,
            None => match self.self_card()? {
                Some(card) => card,
                None => keys.issue_card(&self.identity, self.enable_ratchet, None),
            },
        };
        message::decrypt(&keys, &sender, text)
    }

    #[instrument(skip_all, fields(identity = %self.identity))]
    fn backup_private_key(&self, password: &str) -> Result<()> {
        let keys = self.require_keys()?;
        self.authorize()?;
        let backup = self.seal_backup(&keys, password)?;
        self.cloud.store_backup(&self.identity, backup, false)
    }

    #[instrument(skip(self), fields(identity = %self.identity))]
    fn reset_private_key_backup(&self) -> Result<()> {
        self.authorize()?;
        self.cloud.remove_backup(&self.identity)
    }

    #[instrument(skip_all, fields(identity = %self.identity))]
    fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        self.authorize()?;
        let keys = self.open_backup(&self.fetch_backup()?, old_password)?;
        let backup = self.seal_backup(&keys, new_password)?;
        self.cloud.store_backup(&self.identity, backup, true)
    }

    #[instrument(skip_all, fields(identity = %self.identity))]
    fn restore_private_key(&self, password: &str) -> Result<()> {
        self.ensure_no_local_key()?;
        self.authorize()?;
        let keys = self.open_backup(&self.fetch_backup()?, password)?;
        let card = self.cloud.card(&self.identity);
        self.save_local(keys, card.as_ref())?;
        info!("Private key restored from backup");
        Ok(())
    }

    #[instrument(skip(self), fields(identity = %self.identity))]
    fn unregister(&self) -> Result<()> {
        self.authorize()?;
        self.cloud.revoke(&self.identity)?;
        self.wipe_local()?;
        info!("Identity unregistered");
        Ok(())
    }

    #[instrument(skip(self, card), fields(identity = %self.identity, peer = %card.identity))]
    fn create_ratchet_channel(&self, card: &Card) -> Result<Arc<dyn RatchetChannel>> {
        self.check_channel_peer(card)?;
        let keys = self.require_keys()?;
        let own_card = self
            .self_card()?
            .ok_or_else(|| EngineError::ratchet(messages::RATCHET_NO_SELF_CARD))?;
        self.authorize()?;

        let peer_key = peer_public_key(card)?;
        let (ephemeral, ephemeral_public) = crypto::ephemeral();
        let ephemeral_part = zeroize::Zeroizing::new(ephemeral.diffie_hellman(&peer_key).to_bytes());
        let static_part = keys.agree(&peer_key);
        let root = handshake_root(&ephemeral_part, &static_part, &self.identity, &card.identity)?;

        self.cloud.post_invitation(
            &self.identity,
            &card.identity,
            Invitation {
                ephemeral_key: ephemeral_public.to_bytes(),
                initiator_card_id: own_card.id,
                created_at: Utc::now(),
            },
        );
        let channel = self.open_channel(
            ChannelState::from_root(&card.identity, &root, true)?,
            &card.identity,
        )?;
        info!("Ratchet channel created");
        Ok(channel)
    }

    #[instrument(skip(self, card), fields(identity = %self.identity, peer = %card.identity))]
    fn join_ratchet_channel(&self, card: &Card) -> Result<Arc<dyn RatchetChannel>> {
        self.check_channel_peer(card)?;
        let keys = self.require_keys()?;
        self.authorize()?;

        let invitation = self
            .cloud
            .take_invitation(&card.identity, &self.identity)
            .ok_or_else(|| EngineError::ratchet(messages::RATCHET_NO_INVITATION))?;
        if invitation.initiator_card_id != card.id {
            return Err(EngineError::protocol(
                "Invitation was issued with a different card of the peer",
            ));
        }

        let peer_key = peer_public_key(card)?;
        let ephemeral_part = keys.agree(&PublicKey::from(invitation.ephemeral_key));
        let static_part = keys.agree(&peer_key);
        let root = handshake_root(&ephemeral_part, &static_part, &card.identity, &self.identity)?;

        let channel = self.open_channel(
            ChannelState::from_root(&card.identity, &root, false)?,
            &card.identity,
        )?;
        info!("Ratchet channel joined");
        Ok(channel)
    }

    fn get_ratchet_channel(&self, card: &Card) -> Result<Option<Arc<dyn RatchetChannel>>> {
        if let Some(channel) = self.channels.lock().get(&card.identity) {
            return Ok(Some(channel.clone() as Arc<dyn RatchetChannel>));
        }
        let Some(state) = ChannelState::load(self.storage.as_ref(), &card.identity)? else {
            return Ok(None);
        };

        let channel = Arc::new(LocalRatchetChannel::new(state, self.storage.clone()));
        self.channels
            .lock()
            .insert(card.identity.clone(), channel.clone());
        debug!(peer = %card.identity, "Ratchet channel loaded from storage");
        Ok(Some(channel))
    }

    #[instrument(skip(self, card), fields(identity = %self.identity, peer = %card.identity))]
    fn delete_ratchet_channel(&self, card: &Card) -> Result<()> {
        self.authorize()?;
        self.cloud.clear_invitations(&self.identity, &card.identity);
        self.storage.delete(&ratchet::storage_entry(&card.identity))?;
        self.channels.lock().remove(&card.identity);
        Ok(())
    }

    fn export_card(&self, card: &Card) -> Result<String> {
        card.export()
    }

    fn import_card(&self, raw: &str) -> Result<Card> {
        Card::import(raw)
    }

    fn close(&self) {
        self.channels.lock().clear();
        *self.keys.write() = None;
        debug!(identity = %self.identity, "Engine closed");
    }
}

impl fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEngine")
            .field("identity", &self.identity)
            .field("enable_ratchet", &self.enable_ratchet)
            .finish()
    }
}
