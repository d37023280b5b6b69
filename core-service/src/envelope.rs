//! Uniform result shape of every dispatched command.

use bridge_traits::channel::{ChannelReply, MethodResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure triple as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable snake_case code the host branches on.
    pub code: String,
    pub message: Option<String>,
    pub details: Option<Value>,
}

impl ErrorReply {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    Success(Value),
    Failure(ErrorReply),
}

impl Envelope {
    pub fn success(value: impl Into<Value>) -> Self {
        Envelope::Success(value.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    /// Error code of a failure, `None` on success.
    pub fn code(&self) -> Option<&str> {
        match self {
            Envelope::Success(_) => None,
            Envelope::Failure(reply) => Some(&reply.code),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Envelope::Success(value) => Some(value),
            Envelope::Failure(_) => None,
        }
    }

    /// Hands the envelope to a host reply sink.
    pub fn deliver_to(self, result: Box<dyn MethodResult>) {
        match self {
            Envelope::Success(value) => result.success(value),
            Envelope::Failure(reply) => result.error(reply.code, reply.message, reply.details),
        }
    }
}

impl From<Envelope> for ChannelReply {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Success(value) => ChannelReply::Success { value },
            Envelope::Failure(reply) => ChannelReply::Error {
                code: reply.code,
                message: reply.message,
                details: reply.details,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let ok = Envelope::success(true);
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&json!(true)));
        assert_eq!(ok.code(), None);

        let failed = Envelope::Failure(ErrorReply::new("not_initialized", "nope"));
        assert!(!failed.is_success());
        assert_eq!(failed.code(), Some("not_initialized"));
    }

    #[test]
    fn test_serialized_shape() {
        let failed = Envelope::Failure(
            ErrorReply::new("method_not_recognized", "Method is not recognized")
                .with_details(json!("Method name: 'x'")),
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "status": "failure",
                "payload": {
                    "code": "method_not_recognized",
                    "message": "Method is not recognized",
                    "details": "Method name: 'x'"
                }
            })
        );
    }

    #[test]
    fn test_into_channel_reply() {
        let reply: ChannelReply = Envelope::success("abc").into();
        assert_eq!(reply, ChannelReply::success("abc"));
    }
}
