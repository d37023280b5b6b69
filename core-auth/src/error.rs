use std::time::Duration;
use thiserror::Error;

/// Failure of a token round trip to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The host answered the callback with an error.
    #[error("{code}: {}", host_message(.message))]
    Host {
        code: String,
        message: Option<String>,
    },

    /// The host has no handler registered for the callback method.
    #[error("Host did not implement `{method}`")]
    NotImplemented { method: String },

    #[error("Host returned a token that is not a string")]
    InvalidToken,

    #[error("Host did not answer the token request within {0:?}")]
    Timeout(Duration),

    /// The completion slot was dropped before anything was delivered.
    #[error("Token request was abandoned before the host replied")]
    Abandoned,

    #[error("Token request could not be delivered: {0}")]
    Transport(String),
}

impl TokenError {
    /// Short reason used in events and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Host { .. } => "host_error",
            TokenError::NotImplemented { .. } => "not_implemented",
            TokenError::InvalidToken => "invalid_token",
            TokenError::Timeout(_) => "timeout",
            TokenError::Abandoned => "abandoned",
            TokenError::Transport(_) => "transport",
        }
    }
}

fn host_message(message: &Option<String>) -> &str {
    message.as_deref().unwrap_or("null")
}

pub type Result<T> = std::result::Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_renders_code_and_message() {
        let err = TokenError::Host {
            code: "401".to_string(),
            message: Some("expired".to_string()),
        };
        assert_eq!(err.to_string(), "401: expired");

        let err = TokenError::Host {
            code: "E".to_string(),
            message: None,
        };
        assert_eq!(err.to_string(), "E: null");
    }

    #[test]
    fn test_reasons_are_stable() {
        assert_eq!(TokenError::Abandoned.reason(), "abandoned");
        assert_eq!(
            TokenError::Timeout(Duration::from_secs(1)).reason(),
            "timeout"
        );
    }
}
