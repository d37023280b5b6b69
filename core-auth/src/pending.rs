//! Single-use completion slot for one token request.
//!
//! [`pending_request`] splits a request into the waiting half
//! ([`PendingTokenRequest`]), held by the blocked engine worker, and a
//! cloneable completing half ([`TokenCompleter`]), held by whatever receives
//! the host's reply. The first completion wins. When every completer is
//! dropped without completing, the waiter resumes with
//! [`TokenError::Abandoned`] instead of hanging.

use crate::error::{Result, TokenError};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Creates a linked waiter/completer pair for `instance_id`.
pub fn pending_request(instance_id: impl Into<String>) -> (PendingTokenRequest, TokenCompleter) {
    let request_id = Uuid::new_v4();
    let instance_id = instance_id.into();
    let (sender, receiver) = oneshot::channel();

    let completer = TokenCompleter {
        request_id,
        instance_id: instance_id.clone(),
        slot: Arc::new(Mutex::new(Some(sender))),
    };
    let pending = PendingTokenRequest {
        request_id,
        instance_id,
        receiver,
    };

    (pending, completer)
}

/// Waiting half of a token request.
#[derive(Debug)]
pub struct PendingTokenRequest {
    request_id: Uuid,
    instance_id: String,
    receiver: oneshot::Receiver<Result<String>>,
}

impl PendingTokenRequest {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Blocks the current thread until the request is completed.
    ///
    /// Must be called from a blocking worker (`spawn_blocking` or a plain
    /// thread), never from an async runtime worker.
    ///
    /// # Errors
    ///
    /// Returns the delivered error, or [`TokenError::Abandoned`] if every
    /// completer was dropped first.
    pub fn wait(self) -> Result<String> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(TokenError::Abandoned))
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub async fn wait_async(self) -> Result<String> {
        self.receiver.await.unwrap_or(Err(TokenError::Abandoned))
    }
}

/// Completing half of a token request. Clones share the same slot.
#[derive(Debug, Clone)]
pub struct TokenCompleter {
    request_id: Uuid,
    instance_id: String,
    slot: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

impl TokenCompleter {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Delivers `outcome` if nothing was delivered before.
    ///
    /// Returns `true` when this call resolved the request. Later calls are
    /// ignored and return `false`.
    pub fn complete(&self, outcome: Result<String>) -> bool {
        let Some(sender) = self.slot.lock().take() else {
            debug!(
                instance_id = %self.instance_id,
                request_id = %self.request_id,
                "Ignoring duplicate token completion"
            );
            return false;
        };

        if sender.send(outcome).is_err() {
            debug!(
                instance_id = %self.instance_id,
                request_id = %self.request_id,
                "Token waiter went away before completion"
            );
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_completion_wins() {
        let (pending, completer) = pending_request("a");
        let duplicate = completer.clone();

        assert!(completer.complete(Ok("first".to_string())));
        assert!(!duplicate.complete(Ok("second".to_string())));
        assert!(duplicate.is_completed());

        assert_eq!(pending.wait().unwrap(), "first");
    }

    #[test]
    fn test_dropped_completer_releases_waiter() {
        let (pending, completer) = pending_request("a");
        let handle = thread::spawn(move || pending.wait());

        drop(completer);

        assert_eq!(handle.join().unwrap(), Err(TokenError::Abandoned));
    }

    #[test]
    fn test_error_completion_from_other_thread() {
        let (pending, completer) = pending_request("a");
        assert_eq!(pending.instance_id(), "a");
        assert_eq!(pending.request_id(), completer.request_id());

        thread::spawn(move || {
            completer.complete(Err(TokenError::InvalidToken));
        });

        assert_eq!(pending.wait(), Err(TokenError::InvalidToken));
    }

    #[tokio::test]
    async fn test_wait_async() {
        let (pending, completer) = pending_request("a");
        tokio::spawn(async move {
            completer.complete(Ok("t".to_string()));
        });

        assert_eq!(pending.wait_async().await.unwrap(), "t");
    }
}
