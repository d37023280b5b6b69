//! # Event Bus
//!
//! Broadcast of bridge lifecycle events over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The registry, the token bridge and the dispatcher publish typed
//! [`BridgeEvent`]s. Hosts and tests subscribe to observe instance churn and
//! token round trips without hooking into logging.
//!
//! ```text
//! ┌──────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │  Registry    ├────────>│           ├────────────>│ Subscriber │
//! ├──────────────┤         │ EventBus  │             └────────────┘
//! │ Token bridge ├────────>│           │  subscribe  ┌────────────┐
//! ├──────────────┤         │           ├────────────>│ Subscriber │
//! │ Dispatcher   ├────────>│           │             └────────────┘
//! └──────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BridgeEvent, EventBus, InstanceEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut events = bus.subscribe();
//!
//! bus.emit(BridgeEvent::Instance(InstanceEvent::Removed {
//!     instance_id: "a".to_string(),
//! }))
//! .ok();
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.instance_id(), Some("a"));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! `emit` fails only when nobody is subscribed; publishers ignore that case.
//! Slow subscribers get `RecvError::Lagged(n)` and may continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeEvent {
    Instance(InstanceEvent),
    Token(TokenEvent),
    Command(CommandEvent),
}

impl BridgeEvent {
    pub fn description(&self) -> &str {
        match self {
            BridgeEvent::Instance(e) => e.description(),
            BridgeEvent::Token(e) => e.description(),
            BridgeEvent::Command(e) => e.description(),
        }
    }

    /// Instance the event belongs to.
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            BridgeEvent::Instance(InstanceEvent::Initialized { instance_id, .. })
            | BridgeEvent::Instance(InstanceEvent::Replaced { instance_id })
            | BridgeEvent::Instance(InstanceEvent::Removed { instance_id })
            | BridgeEvent::Instance(InstanceEvent::InitFailed { instance_id, .. })
            | BridgeEvent::Token(TokenEvent::Requested { instance_id, .. })
            | BridgeEvent::Token(TokenEvent::Resolved { instance_id, .. })
            | BridgeEvent::Token(TokenEvent::Failed { instance_id, .. }) => Some(instance_id),
            BridgeEvent::Command(CommandEvent::Completed { instance_id, .. }) => {
                instance_id.as_deref()
            }
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            BridgeEvent::Instance(InstanceEvent::InitFailed { .. }) => EventSeverity::Error,
            BridgeEvent::Token(TokenEvent::Failed { .. }) => EventSeverity::Warning,
            BridgeEvent::Instance(InstanceEvent::Replaced { .. }) => EventSeverity::Warning,
            BridgeEvent::Instance(InstanceEvent::Initialized { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum InstanceEvent {
    Initialized {
        instance_id: String,
        identity: String,
    },
    /// A newer `init` took the slot of a live session.
    Replaced {
        instance_id: String,
    },
    Removed {
        instance_id: String,
    },
    InitFailed {
        instance_id: String,
        code: String,
    },
}

impl InstanceEvent {
    fn description(&self) -> &str {
        match self {
            InstanceEvent::Initialized { .. } => "Instance initialized",
            InstanceEvent::Replaced { .. } => "Instance replaced by a newer init",
            InstanceEvent::Removed { .. } => "Instance removed",
            InstanceEvent::InitFailed { .. } => "Instance initialization failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TokenEvent {
    Requested {
        instance_id: String,
        request_id: String,
    },
    Resolved {
        instance_id: String,
        request_id: String,
    },
    Failed {
        instance_id: String,
        request_id: String,
        reason: String,
    },
}

impl TokenEvent {
    fn description(&self) -> &str {
        match self {
            TokenEvent::Requested { .. } => "Token requested from host",
            TokenEvent::Resolved { .. } => "Token delivered by host",
            TokenEvent::Failed { .. } => "Token request failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CommandEvent {
    Completed {
        method: String,
        instance_id: Option<String>,
        /// `None` on success, the error code otherwise.
        error_code: Option<String>,
    },
}

impl CommandEvent {
    fn description(&self) -> &str {
        match self {
            CommandEvent::Completed {
                error_code: None, ..
            } => "Command succeeded",
            CommandEvent::Completed { .. } => "Command failed",
        }
    }
}

/// Cloneable handle to the broadcast channel.
///
/// Every clone publishes into the same channel; each `subscribe` call creates
/// an independent receiver that sees events emitted after it was created.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers, or an error when there are none.
    pub fn emit(&self, event: BridgeEvent) -> Result<usize, SendError<BridgeEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
