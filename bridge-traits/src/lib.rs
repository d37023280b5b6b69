//! # Host Bridge Traits
//!
//! Contracts between the E3Kit bridge core and the host application that
//! embeds it.
//!
//! ## Overview
//!
//! The bridge is driven entirely through one asynchronous method channel. This
//! crate defines both directions of that channel and the few host services the
//! core needs around it. Each host platform ships concrete adapters (see
//! `bridge-desktop` for the in-process/desktop ones).
//!
//! ## Traits
//!
//! ### Method channel
//! - [`HostChannel`](channel::HostChannel) - Requests sent from the bridge to the host (token callback)
//! - [`MethodResult`](channel::MethodResult) - One-shot reply sink for a host-issued [`MethodCall`](channel::MethodCall)
//!
//! ### Platform integration
//! - [`ReplyExecutor`](executor::ReplyExecutor) - Runs reply deliveries on the context the host transport requires
//! - [`LoggerSink`](log::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Transport-level failures use [`BridgeError`](error::BridgeError). Host-level
//! failures (the host answered with an error) are regular
//! [`ChannelReply::Error`](channel::ChannelReply) values.
//!
//! ## Thread Safety
//!
//! All shared traits require `Send + Sync`. `MethodResult` only requires
//! `Send` because it is consumed exactly once by whichever thread delivers the
//! reply.

pub mod channel;
pub mod error;
pub mod executor;
pub mod log;

pub use error::BridgeError;

pub use channel::{ChannelReply, HostChannel, MethodCall, MethodResult};
pub use executor::{InlineExecutor, ReplyExecutor, ReplyJob};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
