//! Multi-recipient signed messages.
//!
//! Layout: a fresh content key encrypts `signature || plaintext`; the content
//! key is wrapped once per recipient with a key derived from an ephemeral
//! X25519 agreement. The result is base64 JSON.

use super::crypto::{self, IdentityKeys};
use crate::card::Card;
use crate::error::{messages, EngineError, Result};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey;

const FORMAT_VERSION: u8 = 1;
const SIGNATURE_LEN: usize = 64;

#[derive(Serialize, Deserialize)]
struct SealedMessage {
    v: u8,
    ephemeral: String,
    recipients: Vec<WrappedKey>,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct WrappedKey {
    id: String,
    key: String,
}

/// Encrypts `text` for every public key in `recipients`.
pub(crate) fn encrypt(sender: &IdentityKeys, recipients: &[PublicKey], text: &str) -> Result<String> {
    let content_key = crypto::random_key();
    let (ephemeral, ephemeral_public) = crypto::ephemeral();

    let mut wrapped = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let shared = ephemeral.diffie_hellman(recipient);
        let wrapping = crypto::derive_key(shared.as_bytes(), "wrap", recipient.as_bytes())?;
        let id = crypto::key_id(recipient);
        let sealed = crypto::seal(&wrapping, content_key.as_slice(), id.as_bytes())?;
        wrapped.push(WrappedKey {
            id,
            key: crypto::encode(&sealed),
        });
    }

    let signature = sender.sign(text.as_bytes());
    let mut body = Vec::with_capacity(SIGNATURE_LEN + text.len());
    body.extend_from_slice(&signature.to_bytes());
    body.extend_from_slice(text.as_bytes());
    let body = crypto::seal(&content_key, &body, ephemeral_public.as_bytes())?;

    let message = SealedMessage {
        v: FORMAT_VERSION,
        ephemeral: crypto::encode(ephemeral_public.as_bytes()),
        recipients: wrapped,
        body: crypto::encode(&body),
    };
    let json = serde_json::to_vec(&message)
        .map_err(|e| EngineError::encoding(format!("Failed to encode message: {}", e)))?;
    Ok(crypto::encode(&json))
}

/// Decrypts a message addressed to `receiver` and checks the sender signature.
pub(crate) fn decrypt(receiver: &IdentityKeys, sender: &Card, text: &str) -> Result<String> {
    let json = crypto::decode(text, "message")?;
    let message: SealedMessage = serde_json::from_slice(&json)
        .map_err(|e| EngineError::encoding(format!("Message is malformed: {}", e)))?;
    if message.v != FORMAT_VERSION {
        return Err(EngineError::protocol(format!(
            "Unsupported message version {}",
            message.v
        )));
    }

    let own_id = receiver.key_id();
    let slot = message
        .recipients
        .iter()
        .find(|r| r.id == own_id)
        .ok_or_else(|| EngineError::protocol(messages::RECIPIENT_NOT_FOUND))?;

    let ephemeral_bytes: [u8; 32] = crypto::decode(&message.ephemeral, "ephemeral key")?
        .try_into()
        .map_err(|_| EngineError::encoding("Invalid ephemeral key length"))?;
    let ephemeral = PublicKey::from(ephemeral_bytes);

    let shared = receiver.agree(&ephemeral);
    let wrapping = crypto::derive_key(
        shared.as_slice(),
        "wrap",
        receiver.exchange_public().as_bytes(),
    )?;
    let content_key: [u8; 32] = crypto::open(&wrapping, &crypto::decode(&slot.key, "wrapped key")?, own_id.as_bytes())
        .and_then(|k| k.try_into().ok())
        .ok_or_else(|| EngineError::protocol("Failed to unwrap message key"))?;

    let body = crypto::open(
        &content_key,
        &crypto::decode(&message.body, "message body")?,
        ephemeral.as_bytes(),
    )
    .ok_or_else(|| EngineError::protocol("Failed to decrypt message body"))?;
    if body.len() < SIGNATURE_LEN {
        return Err(EngineError::protocol("Message body is truncated"));
    }

    let (signature, plaintext) = body.split_at(SIGNATURE_LEN);
    let signature: [u8; SIGNATURE_LEN] = signature
        .try_into()
        .map_err(|_| EngineError::protocol("Message body is truncated"))?;
    verify(&sender.verifying_key()?, plaintext, &Signature::from_bytes(&signature))?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| EngineError::encoding("Decrypted message is not valid UTF-8"))
}

fn verify(key: &VerifyingKey, data: &[u8], signature: &Signature) -> Result<()> {
    key.verify(data, signature)
        .map_err(|_| EngineError::protocol(messages::VERIFICATION_FAILED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_recipient_can_decrypt() {
        let alice = IdentityKeys::generate();
        let bob = IdentityKeys::generate();
        let carol = IdentityKeys::generate();
        let alice_card = alice.issue_card("alice", false, None);

        let sealed = encrypt(
            &alice,
            &[alice.exchange_public(), bob.exchange_public(), carol.exchange_public()],
            "hi all",
        )
        .unwrap();

        for keys in [&alice, &bob, &carol] {
            assert_eq!(decrypt(keys, &alice_card, &sealed).unwrap(), "hi all");
        }
    }

    #[test]
    fn test_outsider_is_not_a_recipient() {
        let alice = IdentityKeys::generate();
        let eve = IdentityKeys::generate();
        let alice_card = alice.issue_card("alice", false, None);

        let sealed = encrypt(&alice, &[alice.exchange_public()], "secret").unwrap();

        assert_eq!(
            decrypt(&eve, &alice_card, &sealed).unwrap_err().to_string(),
            messages::RECIPIENT_NOT_FOUND
        );
    }

    #[test]
    fn test_wrong_sender_fails_verification() {
        let alice = IdentityKeys::generate();
        let bob = IdentityKeys::generate();
        let mallory_card = IdentityKeys::generate().issue_card("mallory", false, None);

        let sealed = encrypt(&alice, &[bob.exchange_public()], "from alice").unwrap();

        assert_eq!(
            decrypt(&bob, &mallory_card, &sealed).unwrap_err().to_string(),
            messages::VERIFICATION_FAILED
        );
    }

    #[test]
    fn test_malformed_input_is_encoding_error() {
        let alice = IdentityKeys::generate();
        let card = alice.issue_card("alice", false, None);
        let err = decrypt(&alice, &card, "not base64!").unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::Encoding));
    }
}
