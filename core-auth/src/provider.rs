//! Synchronous token source consumed by the crypto engine.

use crate::error::Result;

/// Supplies a fresh access token on demand.
///
/// The engine calls this from a blocking worker whenever it is about to talk
/// to the key directory. Implementations may block for as long as the round
/// trip takes, but must never be called from an async runtime worker.
pub trait TokenProvider: Send + Sync {
    fn get_token(&self) -> Result<String>;
}

/// Provider returning the same token every time.
///
/// Used by embedders that mint long-lived tokens, and by tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn get_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

impl<F> TokenProvider for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn get_token(&self) -> Result<String> {
        self()
    }
}
