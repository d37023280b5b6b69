//! Method-channel contracts shared by the bridge and its hosts.
//!
//! A host application and the bridge talk over one asynchronous, bidirectional
//! method channel. Inbound traffic is a [`MethodCall`] answered through a
//! [`MethodResult`]; outbound traffic (the bridge asking the host for
//! something, such as an access token) goes through a [`HostChannel`] and is
//! answered with a [`ChannelReply`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A single command sent by the host.
///
/// `arguments` is a JSON object in every well-formed call. Anything else is
/// treated as an empty argument map by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Returns the argument object, or `None` when the payload is not a map.
    pub fn argument_map(&self) -> Option<&Map<String, Value>> {
        self.arguments.as_object()
    }
}

/// Outcome of a request that crossed the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelReply {
    Success {
        value: Value,
    },
    Error {
        code: String,
        message: Option<String>,
        details: Option<Value>,
    },
    NotImplemented,
}

impl ChannelReply {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success {
            value: value.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: Option<String>) -> Self {
        Self::Error {
            code: code.into(),
            message,
            details: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Outbound half of the method channel: requests the bridge sends to the host.
///
/// Implementations deliver the request on whatever context the host requires
/// and resolve once the host has answered.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::channel::{ChannelReply, HostChannel};
/// use serde_json::json;
///
/// async fn fetch_token(channel: &dyn HostChannel) -> Option<String> {
///     match channel.invoke_method("tokenCallback", json!({ "_id": "a" })).await {
///         Ok(ChannelReply::Success { value }) => value.as_str().map(str::to_string),
///         _ => None,
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait HostChannel: Send + Sync {
    /// Sends `method` with `arguments` to the host and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns an error when the request could not be delivered or the
    /// transport went away before the host answered. A host-level failure is
    /// a successful delivery and comes back as [`ChannelReply::Error`].
    async fn invoke_method(&self, method: &str, arguments: Value) -> Result<ChannelReply>;
}

/// Inbound reply sink handed over with every [`MethodCall`].
///
/// Every method consumes the sink, so at most one reply can be produced per
/// call.
pub trait MethodResult: Send {
    fn success(self: Box<Self>, value: Value);

    fn error(self: Box<Self>, code: String, message: Option<String>, details: Option<Value>);

    fn not_implemented(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_map_requires_object() {
        let call = MethodCall::new("getIdentity", json!({ "_id": "a" }));
        assert_eq!(
            call.argument_map().and_then(|m| m.get("_id")),
            Some(&json!("a"))
        );

        let call = MethodCall::new("getIdentity", json!(["a"]));
        assert!(call.argument_map().is_none());
    }

    #[test]
    fn test_method_call_defaults_missing_arguments() {
        let call: MethodCall = serde_json::from_str(r#"{"method":"init"}"#).unwrap();
        assert_eq!(call.method, "init");
        assert!(call.arguments.is_null());
    }

    #[test]
    fn test_channel_reply_serialization() {
        let reply = ChannelReply::error("boom", Some("went wrong".to_string()));
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded["status"], "error");
        assert_eq!(encoded["code"], "boom");

        let decoded: ChannelReply = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, reply);
        assert!(ChannelReply::success(json!("t")).is_success());
    }
}
