//! # Desktop Bridge Implementations
//!
//! In-process implementations of the bridge traits for desktop hosts and
//! test harnesses.
//!
//! ## Overview
//!
//! - [`LocalHostChannel`]: `HostChannel` answered by Rust closures registered
//!   per method name
//! - [`DedicatedThreadExecutor`]: `ReplyExecutor` that runs every reply on one
//!   long-lived thread, standing in for a host UI thread
//! - [`reply_channel`]: `MethodResult` whose reply can be awaited
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{reply_channel, LocalHostChannel};
//! use bridge_traits::ChannelReply;
//!
//! let host = LocalHostChannel::new();
//! host.register_handler("tokenCallback", |_args| async {
//!     ChannelReply::success("jwt")
//! })
//! .await;
//!
//! let (result, reply) = reply_channel();
//! dispatcher.handle(call, result);
//! let reply = reply.await?;
//! ```

mod channel;
mod executor;
mod result;

pub use channel::LocalHostChannel;
pub use executor::DedicatedThreadExecutor;
pub use result::{reply_channel, OneshotMethodResult};
