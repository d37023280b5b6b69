//! # Error Translator
//!
//! Maps engine failures onto the stable error vocabulary of the channel.
//!
//! ## Overview
//!
//! Translation is a pure function of the tagged [`EngineError`]:
//!
//! 1. a domain failure whose message is in the fixed table of its kind gets
//!    the table code. Messages match exactly, or after dropping a leading
//!    numeric `"NNNNN: "` prefix on either side
//! 2. any other domain failure gets the generic code of its kind
//! 3. an unclassified failure gets `unknown_error`
//!
//! Token failures map to the `token_callback_*` family. The message text is
//! always carried over unchanged and is never empty.

use crate::envelope::ErrorReply;

use core_auth::TokenError;
use core_engine::error::{messages, EngineError, ErrorKind};

pub const UNKNOWN_ERROR: &str = "unknown_error";

const TABLE: &[(ErrorKind, &str, &str)] = &[
    (
        ErrorKind::Registration,
        messages::USER_ALREADY_REGISTERED,
        "user_is_already_registered",
    ),
    (
        ErrorKind::Registration,
        messages::PRIVATE_KEY_EXISTS,
        "private_key_exists",
    ),
    (
        ErrorKind::Registration,
        messages::USER_NOT_REGISTERED,
        "user_is_not_registered",
    ),
    (
        ErrorKind::Registration,
        messages::MISSING_PRIVATE_KEY,
        "missing_private_key",
    ),
    (
        ErrorKind::Registration,
        messages::USERS_NOT_FOUND,
        "users_not_found",
    ),
    (
        ErrorKind::KeyStorage,
        messages::BACKUP_EXISTS,
        "private_key_backup_exists",
    ),
    (
        ErrorKind::KeyStorage,
        messages::BACKUP_NOT_FOUND,
        "private_key_backup_not_found",
    ),
    (ErrorKind::KeyStorage, messages::WRONG_PASSWORD, "wrong_password"),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_ENCRYPT_EMPTY,
        "trying_to_encrypt_empty_array",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_DECRYPT_EMPTY,
        "trying_to_decrypt_empty_array",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_CHANNEL_EXISTS,
        "channel_already_exists",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_CHANNEL_WITH_SELF,
        "channel_with_self_is_forbidden",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_NOT_ENABLED,
        "ratchet_not_enabled",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_NOT_ENABLED_FOR_USER,
        "ratchet_not_enabled_for_provided_user",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_NO_INVITATION,
        "no_invitation_from_provided_user",
    ),
    (
        ErrorKind::Ratchet,
        messages::RATCHET_NO_SELF_CARD,
        "no_self_card_in_local_storage",
    ),
    (
        ErrorKind::Protocol,
        messages::VERIFICATION_FAILED,
        "verification_failed",
    ),
    (
        ErrorKind::Protocol,
        messages::RECIPIENT_NOT_FOUND,
        "recipient_not_found",
    ),
];

/// Translates an engine failure into the reply sent to the host.
pub fn translate(error: &EngineError) -> ErrorReply {
    match error {
        EngineError::Domain { kind, message } => {
            let code = lookup(*kind, message).unwrap_or_else(|| fallback_code(*kind));
            let message = if message.is_empty() {
                format!("{} failure", kind)
            } else {
                message.clone()
            };
            ErrorReply::new(code, message)
        }
        EngineError::Token(token) => translate_token(token),
        EngineError::Unknown { .. } => ErrorReply::new(UNKNOWN_ERROR, error.to_string()),
    }
}

pub fn translate_token(error: &TokenError) -> ErrorReply {
    let code = match error {
        TokenError::Host { .. } => "token_callback_error",
        TokenError::NotImplemented { .. } => "token_callback_not_implemented",
        TokenError::InvalidToken => "invalid_token",
        TokenError::Timeout(_) => "token_callback_timeout",
        TokenError::Abandoned | TokenError::Transport(_) => "token_callback_failed",
    };
    ErrorReply::new(code, error.to_string())
}

/// Generic code of a domain failure kind.
pub fn fallback_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Registration => "registration_exception",
        ErrorKind::Ratchet => "ratchet_exception",
        ErrorKind::Protocol => "protocol_exception",
        ErrorKind::KeyStorage => "key_storage_exception",
        ErrorKind::SecureSession => "secure_session_exception",
        ErrorKind::Encoding => "encoding_exception",
        ErrorKind::FileDeletion => "file_deletion_exception",
    }
}

fn lookup(kind: ErrorKind, message: &str) -> Option<&'static str> {
    let stripped = strip_numeric_prefix(message);
    TABLE
        .iter()
        .filter(|(table_kind, _, _)| *table_kind == kind)
        .find(|(_, text, _)| *text == message || strip_numeric_prefix(text) == stripped)
        .map(|(_, _, code)| *code)
}

/// Drops a leading `"<digits>: "` prefix.
fn strip_numeric_prefix(message: &str) -> &str {
    let digits = message.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return message;
    }
    message[digits..].strip_prefix(": ").unwrap_or(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_every_table_entry_translates() {
        for (kind, message, code) in TABLE {
            let reply = translate(&EngineError::domain(*kind, *message));
            assert_eq!(reply.code, *code);
            assert_eq!(reply.message.as_deref(), Some(*message));
            assert!(reply.details.is_none());
        }
    }

    #[test]
    fn test_numeric_prefix_is_optional() {
        let reply = translate(&EngineError::ratchet("Trying to encrypt empty array."));
        assert_eq!(reply.code, "trying_to_encrypt_empty_array");
        assert_eq!(reply.message.as_deref(), Some("Trying to encrypt empty array."));

        let reply = translate(&EngineError::ratchet(
            "70001: Channel with provided user and name already exists.",
        ));
        assert_eq!(reply.code, "channel_already_exists");
    }

    #[test]
    fn test_message_of_other_kind_does_not_match() {
        let reply = translate(&EngineError::protocol(messages::USER_ALREADY_REGISTERED));
        assert_eq!(reply.code, "protocol_exception");
    }

    #[test]
    fn test_unlisted_message_uses_kind_fallback() {
        let cases = [
            (ErrorKind::Registration, "registration_exception"),
            (ErrorKind::Ratchet, "ratchet_exception"),
            (ErrorKind::Protocol, "protocol_exception"),
            (ErrorKind::KeyStorage, "key_storage_exception"),
            (ErrorKind::SecureSession, "secure_session_exception"),
            (ErrorKind::Encoding, "encoding_exception"),
            (ErrorKind::FileDeletion, "file_deletion_exception"),
        ];
        for (kind, code) in cases {
            let reply = translate(&EngineError::domain(kind, "Something odd"));
            assert_eq!(reply.code, code);
            assert_eq!(reply.message.as_deref(), Some("Something odd"));
        }
    }

    #[test]
    fn test_empty_domain_message_is_filled() {
        let reply = translate(&EngineError::key_storage(""));
        assert_eq!(reply.code, "key_storage_exception");
        assert_eq!(reply.message.as_deref(), Some("key_storage failure"));
    }

    #[test]
    fn test_unknown_error_message_never_empty() {
        let reply = translate(&EngineError::Unknown {
            type_name: "java.lang.IllegalStateException",
            message: None,
        });
        assert_eq!(reply.code, UNKNOWN_ERROR);
        assert_eq!(reply.message.as_deref(), Some("java.lang.IllegalStateException"));

        let reply = translate(&EngineError::Unknown {
            type_name: "x",
            message: Some("boom".to_string()),
        });
        assert_eq!(reply.message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_token_failures() {
        let reply = translate(&EngineError::Token(TokenError::Host {
            code: "401".to_string(),
            message: Some("expired".to_string()),
        }));
        assert_eq!(reply.code, "token_callback_error");
        assert_eq!(reply.message.as_deref(), Some("401: expired"));

        let cases = [
            (
                TokenError::NotImplemented {
                    method: "tokenCallback".to_string(),
                },
                "token_callback_not_implemented",
            ),
            (TokenError::InvalidToken, "invalid_token"),
            (
                TokenError::Timeout(Duration::from_secs(1)),
                "token_callback_timeout",
            ),
            (TokenError::Abandoned, "token_callback_failed"),
            (
                TokenError::Transport("closed".to_string()),
                "token_callback_failed",
            ),
        ];
        for (error, code) in cases {
            let reply = translate_token(&error);
            assert_eq!(reply.code, code);
            assert!(!reply.message.unwrap_or_default().is_empty());
        }
    }

    #[test]
    fn test_translation_is_deterministic() {
        let error = EngineError::protocol(messages::VERIFICATION_FAILED);
        assert_eq!(translate(&error), translate(&error));
    }

    #[test]
    fn test_strip_numeric_prefix() {
        assert_eq!(strip_numeric_prefix("70204: text"), "text");
        assert_eq!(strip_numeric_prefix("text"), "text");
        assert_eq!(strip_numeric_prefix("70204 text"), "70204 text");
        assert_eq!(strip_numeric_prefix("2fa: text"), "2fa: text");
    }
}
