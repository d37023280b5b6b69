//! Capability surface every crypto engine exposes to the bridge.
//!
//! All methods are synchronous and may block (storage I/O, directory calls,
//! token round trips). Callers run them on blocking workers.

use crate::card::Card;
use crate::error::Result;

use core_auth::TokenProvider;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Cards keyed by identity, as returned by [`CryptoEngine::find_users`].
pub type FindUsersResult = HashMap<String, Card>;

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait CryptoEngine: Send + Sync {
    fn identity(&self) -> String;

    fn has_local_private_key(&self) -> Result<bool>;

    fn register(&self) -> Result<()>;

    fn rotate_private_key(&self) -> Result<()>;

    /// Deletes the local private key and all local ratchet state.
    fn cleanup(&self) -> Result<()>;

    /// Looks up the cards of `identities`. Fails if any of them is unknown.
    fn find_users(&self, identities: &[String]) -> Result<FindUsersResult>;

    /// Encrypts for `recipients` plus the engine's own identity. `None`
    /// encrypts for self only.
    fn encrypt(&self, text: &str, recipients: Option<FindUsersResult>) -> Result<String>;

    /// Decrypts and verifies against `sender`. `None` verifies against self.
    fn auth_decrypt(&self, text: &str, sender: Option<Card>) -> Result<String>;

    fn backup_private_key(&self, password: &str) -> Result<()>;

    fn reset_private_key_backup(&self) -> Result<()>;

    fn change_password(&self, old_password: &str, new_password: &str) -> Result<()>;

    fn restore_private_key(&self, password: &str) -> Result<()>;

    fn unregister(&self) -> Result<()>;

    fn create_ratchet_channel(&self, card: &Card) -> Result<Arc<dyn RatchetChannel>>;

    fn join_ratchet_channel(&self, card: &Card) -> Result<Arc<dyn RatchetChannel>>;

    /// Loads a channel persisted by an earlier create/join.
    fn get_ratchet_channel(&self, card: &Card) -> Result<Option<Arc<dyn RatchetChannel>>>;

    fn delete_ratchet_channel(&self, card: &Card) -> Result<()>;

    fn export_card(&self, card: &Card) -> Result<String>;

    fn import_card(&self, raw: &str) -> Result<Card>;

    /// Releases resources held by the engine. Called once when the owning
    /// session is replaced or removed.
    fn close(&self) {}
}

/// Double-ratchet-style session with one peer.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait RatchetChannel: Send + Sync {
    fn participant(&self) -> String;

    fn encrypt(&self, text: &str) -> Result<String>;

    fn decrypt(&self, text: &str) -> Result<String>;

    /// Decrypts every message in order. Either all succeed and the channel
    /// state advances, or the first failure is returned and the state is
    /// left untouched.
    fn decrypt_multiple(&self, messages: &[String]) -> Result<Vec<String>>;
}

/// Inputs for constructing an engine session.
#[derive(Clone)]
pub struct EngineParams {
    pub identity: String,
    pub token_provider: Arc<dyn TokenProvider>,
    pub enable_ratchet: bool,
}

impl fmt::Debug for EngineParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineParams")
            .field("identity", &self.identity)
            .field("enable_ratchet", &self.enable_ratchet)
            .finish()
    }
}

/// Builds engines. Construction may touch local storage and therefore block.
pub trait EngineFactory: Send + Sync {
    fn create(&self, params: EngineParams) -> Result<Arc<dyn CryptoEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(EngineParams) -> Result<Arc<dyn CryptoEngine>> + Send + Sync,
{
    fn create(&self, params: EngineParams) -> Result<Arc<dyn CryptoEngine>> {
        self(params)
    }
}
