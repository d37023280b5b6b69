//! Key material and primitives of the local engine.

use crate::card::{decode_array, Card};
use crate::error::{EngineError, Result};

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub(crate) const NONCE_LEN: usize = 12;
const KDF_SALT_PREFIX: &[u8] = b"e3kit-bridge/local/v1/";

// Argon2id: 64 MiB, 3 passes, 1 lane.
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 1;

/// Long-term key pair of one identity.
pub(crate) struct IdentityKeys {
    exchange: StaticSecret,
    signing: SigningKey,
}

#[derive(Serialize, Deserialize)]
struct StoredKeys {
    exchange: String,
    signing: String,
}

impl IdentityKeys {
    pub(crate) fn generate() -> Self {
        Self {
            exchange: StaticSecret::random_from_rng(OsRng),
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Serialized private material, wiped on drop.
    pub(crate) fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let exchange = Zeroizing::new(self.exchange.to_bytes());
        let signing = Zeroizing::new(self.signing.to_bytes());
        let stored = StoredKeys {
            exchange: BASE64.encode(exchange.as_slice()),
            signing: BASE64.encode(signing.as_slice()),
        };
        serde_json::to_vec(&stored)
            .map(Zeroizing::new)
            .map_err(|e| EngineError::key_storage(format!("Failed to serialize private key: {}", e)))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let stored: StoredKeys = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::key_storage(format!("Stored private key is corrupted: {}", e)))?;
        let exchange = Zeroizing::new(decode_array::<32>(&stored.exchange, "private exchange key")?);
        let signing = Zeroizing::new(decode_array::<32>(&stored.signing, "private signing key")?);

        Ok(Self {
            exchange: StaticSecret::from(*exchange),
            signing: SigningKey::from_bytes(&signing),
        })
    }

    pub(crate) fn exchange_public(&self) -> PublicKey {
        PublicKey::from(&self.exchange)
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    pub(crate) fn agree(&self, peer: &PublicKey) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.exchange.diffie_hellman(peer).to_bytes())
    }

    /// Recipient slot id of these keys in encrypted messages.
    pub(crate) fn key_id(&self) -> String {
        key_id(&self.exchange_public())
    }

    pub(crate) fn issue_card(
        &self,
        identity: &str,
        ratchet_enabled: bool,
        previous_card_id: Option<String>,
    ) -> Card {
        let exchange_key = BASE64.encode(self.exchange_public().as_bytes());
        let signing_key = BASE64.encode(self.verifying_key().as_bytes());
        let created_at = Utc::now();
        let content = Card::signed_content(
            identity,
            &exchange_key,
            &signing_key,
            ratchet_enabled,
            previous_card_id.as_deref(),
            &created_at,
        );

        Card {
            id: Card::content_id(&content),
            identity: identity.to_string(),
            exchange_key,
            signing_key,
            ratchet_enabled,
            previous_card_id,
            created_at,
            signature: BASE64.encode(self.sign(&content).to_bytes()),
        }
    }
}

pub(crate) fn key_id(public: &PublicKey) -> String {
    let digest = Sha256::digest(public.as_bytes());
    hex::encode(&digest[..8])
}

/// One-off X25519 secret used for a single message or handshake.
pub(crate) fn ephemeral() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

pub(crate) fn derive_key(ikm: &[u8], label: &str, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut salt = KDF_SALT_PREFIX.to_vec();
    salt.extend_from_slice(label.as_bytes());
    let hk = Hkdf::<Sha256>::new(Some(&salt), ikm);
    let mut out = Zeroizing::new([0u8; 32]);
    hk.expand(info, &mut out[..])
        .map_err(|e| EngineError::encoding(format!("Key derivation for '{}' failed: {}", label, e)))?;
    Ok(out)
}

/// Wrapping key for a password-protected backup (Argon2id).
pub(crate) fn password_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_P_COST, Some(32))
        .map_err(|e| EngineError::key_storage(format!("Invalid Argon2 parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| EngineError::key_storage(format!("Argon2 key derivation failed: {}", e)))?;
    Ok(key)
}

pub(crate) fn random_key() -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

/// AES-256-GCM with a random nonce prefixed to the ciphertext.
pub(crate) fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EngineError::protocol("Encryption failed"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Opens data produced by [`seal`]. `None` when authentication fails.
pub(crate) fn open(key: &[u8; 32], sealed: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .ok()
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub(crate) fn decode(value: &str, what: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| EngineError::encoding(format!("Invalid {} encoding: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_survive_serialization() {
        let keys = IdentityKeys::generate();
        let restored = IdentityKeys::from_bytes(&keys.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.exchange_public(), keys.exchange_public());
        assert_eq!(restored.verifying_key(), keys.verifying_key());
        assert_eq!(restored.key_id(), keys.key_id());
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = IdentityKeys::generate();
        let bob = IdentityKeys::generate();

        assert_eq!(
            *alice.agree(&bob.exchange_public()),
            *bob.agree(&alice.exchange_public())
        );
    }

    #[test]
    fn test_seal_open_with_aad() {
        let key = random_key();
        let sealed = seal(&key, b"hello", b"ctx").unwrap();

        assert_eq!(open(&key, &sealed, b"ctx").unwrap(), b"hello");
        assert!(open(&key, &sealed, b"other").is_none());
        assert!(open(&key, &sealed[..4], b"ctx").is_none());
    }

    #[test]
    fn test_derive_key_separates_labels() {
        let a = derive_key(b"secret", "chain", b"x").unwrap();
        let b = derive_key(b"secret", "message", b"x").unwrap();
        assert_ne!(*a, *b);
        assert_eq!(*a, *derive_key(b"secret", "chain", b"x").unwrap());
    }

    #[test]
    fn test_password_key_depends_on_password_and_salt() {
        let salt = [7u8; 16];
        let key = password_key("hunter2", &salt).unwrap();

        assert_eq!(*key, *password_key("hunter2", &salt).unwrap());
        assert_ne!(*key, *password_key("hunter3", &salt).unwrap());
        assert_ne!(*key, *password_key("hunter2", &[8u8; 16]).unwrap());
    }

    #[test]
    fn test_password_key_rejects_short_salt() {
        let err = password_key("hunter2", b"salt").unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::KeyStorage));
    }
}
