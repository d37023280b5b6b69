//! In-process stand-in for the key directory service.
//!
//! Holds published cards, password-protected key backups and pending ratchet
//! invitations. Every call must present a non-empty access token, which is
//! what makes the engine exercise its token provider.

use crate::card::Card;
use crate::error::{messages, EngineError, Result};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Encrypted private key kept by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KeyBackup {
    pub salt: String,
    pub sealed: String,
}

/// Opening message of a ratchet channel, addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invitation {
    pub ephemeral_key: [u8; 32],
    pub initiator_card_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Directory {
    cards: HashMap<String, Card>,
    backups: HashMap<String, KeyBackup>,
    /// Keyed by `(from, to)`.
    invitations: HashMap<(String, String), Invitation>,
}

/// Shared directory used by every [`LocalEngine`](super::LocalEngine) of a
/// process.
#[derive(Default)]
pub struct LocalCloud {
    directory: Mutex<Directory>,
    authorized_calls: AtomicU64,
}

impl LocalCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of calls that presented a valid token.
    pub fn authorized_calls(&self) -> u64 {
        self.authorized_calls.load(Ordering::SeqCst)
    }

    /// Identities with a published card.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.directory.lock().cards.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub(crate) fn authorize(&self, identity: &str, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(EngineError::protocol("Access token is empty"));
        }
        self.authorized_calls.fetch_add(1, Ordering::SeqCst);
        debug!(identity, "Directory call authorized");
        Ok(())
    }

    pub(crate) fn card(&self, identity: &str) -> Option<Card> {
        self.directory.lock().cards.get(identity).cloned()
    }

    pub(crate) fn publish_card(&self, card: Card) -> Result<()> {
        let mut directory = self.directory.lock();
        if let Some(current) = directory.cards.get(&card.identity) {
            if card.previous_card_id.as_deref() != Some(current.id.as_str()) {
                return Err(EngineError::registration(messages::USER_ALREADY_REGISTERED));
            }
        }
        directory.cards.insert(card.identity.clone(), card);
        Ok(())
    }

    /// Removes the card and everything addressed to or from `identity`.
    pub(crate) fn revoke(&self, identity: &str) -> Result<()> {
        let mut directory = self.directory.lock();
        if directory.cards.remove(identity).is_none() {
            return Err(EngineError::registration(messages::USER_NOT_REGISTERED));
        }
        directory.backups.remove(identity);
        directory
            .invitations
            .retain(|(from, to), _| from != identity && to != identity);
        Ok(())
    }

    pub(crate) fn backup(&self, identity: &str) -> Option<KeyBackup> {
        self.directory.lock().backups.get(identity).cloned()
    }

    pub(crate) fn store_backup(&self, identity: &str, backup: KeyBackup, replace: bool) -> Result<()> {
        let mut directory = self.directory.lock();
        if !replace && directory.backups.contains_key(identity) {
            return Err(EngineError::key_storage(messages::BACKUP_EXISTS));
        }
        directory.backups.insert(identity.to_string(), backup);
        Ok(())
    }

    pub(crate) fn remove_backup(&self, identity: &str) -> Result<()> {
        match self.directory.lock().backups.remove(identity) {
            Some(_) => Ok(()),
            None => Err(EngineError::key_storage(messages::BACKUP_NOT_FOUND)),
        }
    }

    pub(crate) fn post_invitation(&self, from: &str, to: &str, invitation: Invitation) {
        self.directory
            .lock()
            .invitations
            .insert((from.to_string(), to.to_string()), invitation);
    }

    pub(crate) fn take_invitation(&self, from: &str, to: &str) -> Option<Invitation> {
        self.directory
            .lock()
            .invitations
            .remove(&(from.to_string(), to.to_string()))
    }

    /// Drops invitations in both directions between two identities.
    pub(crate) fn clear_invitations(&self, a: &str, b: &str) {
        let mut directory = self.directory.lock();
        directory.invitations.remove(&(a.to_string(), b.to_string()));
        directory.invitations.remove(&(b.to_string(), a.to_string()));
    }
}
