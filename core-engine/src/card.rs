//! Public identity cards.
//!
//! A card binds an identity to its exchange (X25519) and signing (Ed25519)
//! public keys. Cards are self-signed and travel between host and engine as
//! base64-encoded JSON.

use crate::error::{EngineError, Result};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Hex SHA-256 of the signed content.
    pub id: String,
    pub identity: String,
    /// Base64 X25519 public key.
    pub exchange_key: String,
    /// Base64 Ed25519 verifying key.
    pub signing_key: String,
    pub ratchet_enabled: bool,
    pub previous_card_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Base64 Ed25519 signature over the signed content.
    pub signature: String,
}

impl Card {
    /// Bytes covered by the card id and the self-signature.
    pub fn signed_content(
        identity: &str,
        exchange_key: &str,
        signing_key: &str,
        ratchet_enabled: bool,
        previous_card_id: Option<&str>,
        created_at: &DateTime<Utc>,
    ) -> Vec<u8> {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            identity,
            exchange_key,
            signing_key,
            ratchet_enabled,
            previous_card_id.unwrap_or(""),
            created_at.timestamp_millis()
        )
        .into_bytes()
    }

    pub fn content_id(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    fn own_content(&self) -> Vec<u8> {
        Self::signed_content(
            &self.identity,
            &self.exchange_key,
            &self.signing_key,
            self.ratchet_enabled,
            self.previous_card_id.as_deref(),
            &self.created_at,
        )
    }

    /// Serializes the card into its transport form.
    ///
    /// # Errors
    ///
    /// Returns an encoding error if serialization fails.
    pub fn export(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| EngineError::encoding(format!("Failed to export card: {}", e)))?;
        Ok(BASE64.encode(json))
    }

    /// Parses and verifies a card produced by [`export`](Self::export).
    ///
    /// # Errors
    ///
    /// Returns an encoding error for malformed input and a protocol error when
    /// the id or the self-signature does not match the content.
    pub fn import(raw: &str) -> Result<Card> {
        let json = BASE64
            .decode(raw.trim())
            .map_err(|e| EngineError::encoding(format!("Card is not valid base64: {}", e)))?;
        let card: Card = serde_json::from_slice(&json)
            .map_err(|e| EngineError::encoding(format!("Card is malformed: {}", e)))?;
        card.verify()?;
        Ok(card)
    }

    /// Checks the card id and self-signature.
    pub fn verify(&self) -> Result<()> {
        let content = self.own_content();
        if Self::content_id(&content) != self.id {
            return Err(EngineError::protocol("Card id does not match its content"));
        }

        let signature = decode_array::<64>(&self.signature, "card signature")?;
        let signature = Signature::from_bytes(&signature);
        self.verifying_key()?
            .verify(&content, &signature)
            .map_err(|_| EngineError::protocol(crate::error::messages::VERIFICATION_FAILED))
    }

    pub fn exchange_public_key(&self) -> Result<[u8; 32]> {
        decode_array::<32>(&self.exchange_key, "exchange key")
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let bytes = decode_array::<32>(&self.signing_key, "signing key")?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| EngineError::encoding(format!("Invalid signing key: {}", e)))
    }
}

pub(crate) fn decode_array<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(value)
        .map_err(|e| EngineError::encoding(format!("Invalid {} encoding: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| EngineError::encoding(format!("Invalid {} length", what)))
}
