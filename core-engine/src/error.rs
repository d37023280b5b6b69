use core_auth::TokenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Family of a domain failure raised by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Identity lifecycle: registration, key presence, card lookup.
    Registration,
    Ratchet,
    /// Message format, signatures and recipients.
    Protocol,
    KeyStorage,
    SecureSession,
    Encoding,
    FileDeletion,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Registration => "registration",
            ErrorKind::Ratchet => "ratchet",
            ErrorKind::Protocol => "protocol",
            ErrorKind::KeyStorage => "key_storage",
            ErrorKind::SecureSession => "secure_session",
            ErrorKind::Encoding => "encoding",
            ErrorKind::FileDeletion => "file_deletion",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure value surfaced by every engine operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{message}")]
    Domain { kind: ErrorKind, message: String },

    /// The token provider failed while the engine needed a token.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Anything the engine could not classify.
    #[error("{}", unknown_text(.type_name, .message))]
    Unknown {
        type_name: &'static str,
        message: Option<String>,
    },
}

fn unknown_text(type_name: &str, message: &Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => message.clone(),
        _ => type_name.to_string(),
    }
}

impl EngineError {
    pub fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        EngineError::Domain {
            kind,
            message: message.into(),
        }
    }

    pub fn registration(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Registration, message)
    }

    pub fn ratchet(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Ratchet, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Protocol, message)
    }

    pub fn key_storage(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::KeyStorage, message)
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::Encoding, message)
    }

    pub fn file_deletion(message: impl Into<String>) -> Self {
        Self::domain(ErrorKind::FileDeletion, message)
    }

    /// Wraps an error of a type the engine has no classification for.
    pub fn unknown<E>(error: &E) -> Self
    where
        E: std::error::Error,
    {
        EngineError::Unknown {
            type_name: std::any::type_name::<E>(),
            message: Some(error.to_string()),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Domain { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Message texts produced by engines for well-known failures.
pub mod messages {
    pub const USER_ALREADY_REGISTERED: &str = "User is already registered";
    pub const PRIVATE_KEY_EXISTS: &str = "Private key already exists in local key storage.";
    pub const USER_NOT_REGISTERED: &str = "User is not registered";
    pub const MISSING_PRIVATE_KEY: &str =
        "No private key on device. You should call register() or restorePrivateKey()";
    pub const USERS_NOT_FOUND: &str = "Card for one or more of provided identities was not found";

    pub const BACKUP_EXISTS: &str = "Private key backup already exists";
    pub const BACKUP_NOT_FOUND: &str = "Private key backup was not found";
    pub const WRONG_PASSWORD: &str = "Wrong password";

    pub const VERIFICATION_FAILED: &str = "Signature verification failed";
    pub const RECIPIENT_NOT_FOUND: &str = "Current user is not a recipient of the message";

    pub const RATCHET_ENCRYPT_EMPTY: &str = "70204: Trying to encrypt empty array.";
    pub const RATCHET_DECRYPT_EMPTY: &str = "70204: Trying to decrypt empty array.";
    pub const RATCHET_CHANNEL_EXISTS: &str =
        "70204: Channel with provided user and name already exists.";
    pub const RATCHET_CHANNEL_WITH_SELF: &str =
        "70204: Channel with self is forbidden. Use regular encryption for this purpose.";
    pub const RATCHET_NOT_ENABLED: &str = "70204: enableRatchet parameter is set to false.";
    pub const RATCHET_NOT_ENABLED_FOR_USER: &str =
        "70204: Provided user has been never initialized with ratchet enabled.";
    pub const RATCHET_NO_INVITATION: &str = "70204: There is no invitation from provided user.";
    pub const RATCHET_NO_SELF_CARD: &str = "70204: There is no self card in local storage.";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_displays_message_verbatim() {
        let err = EngineError::registration(messages::USER_ALREADY_REGISTERED);
        assert_eq!(err.to_string(), "User is already registered");
        assert_eq!(err.kind(), Some(ErrorKind::Registration));
    }

    #[test]
    fn test_unknown_error_falls_back_to_type_name() {
        let err = EngineError::Unknown {
            type_name: "std::io::Error",
            message: None,
        };
        assert_eq!(err.to_string(), "std::io::Error");

        let err = EngineError::Unknown {
            type_name: "std::io::Error",
            message: Some(String::new()),
        };
        assert_eq!(err.to_string(), "std::io::Error");
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_unknown_from_foreign_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        match EngineError::unknown(&io) {
            EngineError::Unknown { type_name, message } => {
                assert!(type_name.ends_with("Error"));
                assert_eq!(message.as_deref(), Some("disk on fire"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_token_error_is_transparent() {
        let err: EngineError = TokenError::InvalidToken.into();
        assert_eq!(err.to_string(), TokenError::InvalidToken.to_string());
    }
}
