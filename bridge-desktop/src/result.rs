//! Awaitable reply sink.

use bridge_traits::channel::{ChannelReply, MethodResult};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// [`MethodResult`] that forwards the reply to a oneshot receiver.
#[derive(Debug)]
pub struct OneshotMethodResult {
    sender: oneshot::Sender<ChannelReply>,
}

/// Create a reply sink and the receiver its reply arrives on.
///
/// The receiver fails with `RecvError` when the sink is dropped without a
/// reply.
pub fn reply_channel() -> (Box<dyn MethodResult>, oneshot::Receiver<ChannelReply>) {
    let (sender, receiver) = oneshot::channel();
    (Box::new(OneshotMethodResult { sender }), receiver)
}

impl OneshotMethodResult {
    fn deliver(self, reply: ChannelReply) {
        if self.sender.send(reply).is_err() {
            debug!("Reply receiver dropped before delivery");
        }
    }
}

impl MethodResult for OneshotMethodResult {
    fn success(self: Box<Self>, value: Value) {
        self.deliver(ChannelReply::Success { value });
    }

    fn error(self: Box<Self>, code: String, message: Option<String>, details: Option<Value>) {
        self.deliver(ChannelReply::Error {
            code,
            message,
            details,
        });
    }

    fn not_implemented(self: Box<Self>) {
        self.deliver(ChannelReply::NotImplemented);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reply_reaches_receiver() {
        let (result, reply) = reply_channel();
        result.error("not_initialized".to_string(), Some("nope".to_string()), None);

        assert_eq!(
            reply.await.unwrap(),
            ChannelReply::error("not_initialized", Some("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_dropped_sink_closes_receiver() {
        let (result, reply) = reply_channel();
        drop(result);
        assert!(reply.await.is_err());
    }

    #[tokio::test]
    async fn test_success_value() {
        let (result, reply) = reply_channel();
        result.success(json!(true));
        assert_eq!(reply.await.unwrap(), ChannelReply::success(true));
    }
}
