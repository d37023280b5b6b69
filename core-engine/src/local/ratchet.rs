//! Symmetric-key ratchet channels of the local engine.
//!
//! Each side keeps a sending and a receiving hash chain derived from the
//! handshake root. Every message advances its chain, so a message key is
//! never reused. Out-of-order delivery is handled by caching the keys of
//! skipped indices. State is persisted in key storage after every change.

use super::crypto::{self, derive_key};
use crate::engine::RatchetChannel;
use crate::error::{messages, EngineError, Result};
use crate::storage::KeyStorage;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Largest gap between the expected and the received index.
const MAX_SKIP: u64 = 1_000;
/// Upper bound on cached keys of skipped messages.
const MAX_SKIPPED_KEYS: usize = 2_000;

pub(crate) const STORAGE_PREFIX: &str = "ratchet/";

pub(crate) fn storage_entry(peer: &str) -> String {
    format!("{}{}", STORAGE_PREFIX, peer)
}

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct ChannelState {
    peer: String,
    send_chain: [u8; 32],
    send_index: u64,
    recv_chain: [u8; 32],
    recv_index: u64,
    skipped: BTreeMap<u64, [u8; 32]>,
}

#[derive(Serialize, Deserialize)]
struct Packet {
    n: u64,
    ct: String,
}

impl ChannelState {
    /// Fresh state from a handshake root. Both sides derive the same two
    /// chains and swap their roles.
    pub(crate) fn from_root(peer: &str, root: &[u8; 32], initiator: bool) -> Result<Self> {
        let forward = derive_key(root, "ratchet/chain", b"initiator")?;
        let backward = derive_key(root, "ratchet/chain", b"responder")?;
        let (send_chain, recv_chain) = if initiator {
            (*forward, *backward)
        } else {
            (*backward, *forward)
        };

        Ok(Self {
            peer: peer.to_string(),
            send_chain,
            send_index: 0,
            recv_chain,
            recv_index: 0,
            skipped: BTreeMap::new(),
        })
    }

    pub(crate) fn load(storage: &dyn KeyStorage, peer: &str) -> Result<Option<Self>> {
        let Some(bytes) = storage.load(&storage_entry(peer))? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            EngineError::key_storage(format!("Ratchet state for '{}' is corrupted: {}", peer, e))
        })
    }

    pub(crate) fn save(&self, storage: &dyn KeyStorage) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| EngineError::key_storage(format!("Failed to serialize ratchet state: {}", e)))?;
        storage.store(&storage_entry(&self.peer), &bytes)
    }

    fn encrypt(&mut self, text: &str) -> Result<String> {
        let n = self.send_index;
        let key = message_key(&self.send_chain, n)?;
        self.send_chain = *derive_key(&self.send_chain, "ratchet/step", &[])?;
        self.send_index += 1;

        let sealed = crypto::seal(&key, text.as_bytes(), &n.to_be_bytes())?;
        let packet = Packet {
            n,
            ct: crypto::encode(&sealed),
        };
        let json = serde_json::to_vec(&packet)
            .map_err(|e| EngineError::encoding(format!("Failed to encode ratchet message: {}", e)))?;
        Ok(crypto::encode(&json))
    }

    fn decrypt(&mut self, text: &str) -> Result<String> {
        let json = crypto::decode(text, "ratchet message")?;
        let packet: Packet = serde_json::from_slice(&json)
            .map_err(|e| EngineError::encoding(format!("Ratchet message is malformed: {}", e)))?;
        let sealed = crypto::decode(&packet.ct, "ratchet ciphertext")?;

        let key = self.receive_key(packet.n)?;
        let plaintext = crypto::open(&key, &sealed, &packet.n.to_be_bytes())
            .ok_or_else(|| EngineError::protocol("Failed to decrypt ratchet message"))?;

        String::from_utf8(plaintext)
            .map_err(|_| EngineError::encoding("Decrypted message is not valid UTF-8"))
    }

    fn receive_key(&mut self, n: u64) -> Result<[u8; 32]> {
        if n < self.recv_index {
            return self.skipped.remove(&n).ok_or_else(|| {
                EngineError::protocol("Ratchet message was already decrypted or is too old")
            });
        }
        if n - self.recv_index > MAX_SKIP {
            return Err(EngineError::protocol("Too many skipped ratchet messages"));
        }

        while self.recv_index < n {
            let skipped = message_key(&self.recv_chain, self.recv_index)?;
            self.skipped.insert(self.recv_index, skipped);
            self.advance_receive()?;
        }
        while self.skipped.len() > MAX_SKIPPED_KEYS {
            self.skipped.pop_first();
        }

        let key = message_key(&self.recv_chain, n)?;
        self.advance_receive()?;
        Ok(key)
    }

    fn advance_receive(&mut self) -> Result<()> {
        self.recv_chain = *derive_key(&self.recv_chain, "ratchet/step", &[])?;
        self.recv_index += 1;
        Ok(())
    }
}

fn message_key(chain: &[u8; 32], index: u64) -> Result<[u8; 32]> {
    Ok(*derive_key(chain, "ratchet/message", &index.to_be_bytes())?)
}

/// Channel handle shared by the engine cache and the bridge session.
pub struct LocalRatchetChannel {
    peer: String,
    state: Mutex<ChannelState>,
    storage: Arc<dyn KeyStorage>,
}

impl LocalRatchetChannel {
    pub(crate) fn new(state: ChannelState, storage: Arc<dyn KeyStorage>) -> Self {
        Self {
            peer: state.peer.clone(),
            state: Mutex::new(state),
            storage,
        }
    }

    /// Applies `change` to a copy of the state and commits it only when the
    /// change succeeded and was persisted.
    fn transact<T>(&self, change: impl FnOnce(&mut ChannelState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let output = change(&mut next)?;
        next.save(self.storage.as_ref())?;
        *state = next;
        Ok(output)
    }
}

impl RatchetChannel for LocalRatchetChannel {
    fn participant(&self) -> String {
        self.peer.clone()
    }

    fn encrypt(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Err(EngineError::ratchet(messages::RATCHET_ENCRYPT_EMPTY));
        }
        self.transact(|state| state.encrypt(text))
    }

    fn decrypt(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Err(EngineError::ratchet(messages::RATCHET_DECRYPT_EMPTY));
        }
        self.transact(|state| state.decrypt(text))
    }

    fn decrypt_multiple(&self, messages: &[String]) -> Result<Vec<String>> {
        if messages.iter().any(String::is_empty) {
            return Err(EngineError::ratchet(messages::RATCHET_DECRYPT_EMPTY));
        }
        let output = self.transact(|state| {
            messages
                .iter()
                .map(|message| state.decrypt(message))
                .collect::<Result<Vec<_>>>()
        })?;
        debug!(peer = %self.peer, count = output.len(), "Decrypted ratchet batch");
        Ok(output)
    }
}

impl fmt::Debug for LocalRatchetChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRatchetChannel")
            .field("peer", &self.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyStorage;

    fn pair() -> (LocalRatchetChannel, LocalRatchetChannel, Arc<MemoryKeyStorage>) {
        let root = [42u8; 32];
        let alice_storage = Arc::new(MemoryKeyStorage::new());
        let alice = LocalRatchetChannel::new(
            ChannelState::from_root("bob", &root, true).unwrap(),
            alice_storage.clone(),
        );
        let bob = LocalRatchetChannel::new(
            ChannelState::from_root("alice", &root, false).unwrap(),
            Arc::new(MemoryKeyStorage::new()),
        );
        (alice, bob, alice_storage)
    }

    #[test]
    fn test_round_trip_both_directions() {
        let (alice, bob, _) = pair();

        let to_bob = alice.encrypt("hello bob").unwrap();
        assert_eq!(bob.decrypt(&to_bob).unwrap(), "hello bob");

        let to_alice = bob.encrypt("hello alice").unwrap();
        assert_eq!(alice.decrypt(&to_alice).unwrap(), "hello alice");
    }

    #[test]
    fn test_replay_is_rejected() {
        let (alice, bob, _) = pair();
        let message = alice.encrypt("once").unwrap();

        bob.decrypt(&message).unwrap();
        assert!(bob.decrypt(&message).is_err());
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (alice, bob, _) = pair();
        let first = alice.encrypt("1").unwrap();
        let second = alice.encrypt("2").unwrap();
        let third = alice.encrypt("3").unwrap();

        assert_eq!(bob.decrypt(&third).unwrap(), "3");
        assert_eq!(bob.decrypt(&first).unwrap(), "1");
        assert_eq!(bob.decrypt(&second).unwrap(), "2");
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (alice, bob, _) = pair();
        let first = alice.encrypt("1").unwrap();
        let second = alice.encrypt("2").unwrap();

        let batch = vec![first.clone(), "bm90IGEgbWVzc2FnZQ==".to_string(), second.clone()];
        assert!(bob.decrypt_multiple(&batch).is_err());

        // Nothing was consumed by the failed batch.
        assert_eq!(
            bob.decrypt_multiple(&[first, second]).unwrap(),
            vec!["1".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn test_empty_input_errors() {
        let (alice, bob, _) = pair();

        assert_eq!(
            alice.encrypt("").unwrap_err().to_string(),
            messages::RATCHET_ENCRYPT_EMPTY
        );
        assert_eq!(
            bob.decrypt("").unwrap_err().to_string(),
            messages::RATCHET_DECRYPT_EMPTY
        );
        assert_eq!(
            bob.decrypt_multiple(&[String::new()]).unwrap_err().to_string(),
            messages::RATCHET_DECRYPT_EMPTY
        );
    }

    #[test]
    fn test_state_is_persisted() {
        let (alice, bob, alice_storage) = pair();
        alice.encrypt("1").unwrap();
        let second = alice.encrypt("2").unwrap();

        let restored = ChannelState::load(alice_storage.as_ref(), "bob")
            .unwrap()
            .unwrap();
        assert_eq!(restored.send_index, 2);

        let reloaded = LocalRatchetChannel::new(restored, alice_storage);
        let third = reloaded.encrypt("3").unwrap();

        assert_eq!(
            bob.decrypt_multiple(&[second, third]).unwrap(),
            vec!["2".to_string(), "3".to_string()]
        );
        assert_eq!(reloaded.participant(), "bob");
    }
}
