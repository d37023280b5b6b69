//! # Token Module
//!
//! Access-token plumbing between the crypto engine and the host application.
//!
//! ## Overview
//!
//! The engine needs a fresh access token before it talks to the key
//! directory, and it asks for one synchronously. Tokens are minted by the
//! host, which can only be reached over the asynchronous method channel. This
//! crate bridges the two:
//!
//! - [`TokenProvider`] is the synchronous contract the engine depends on
//! - [`TokenCallbackBridge`] implements it by calling the host's
//!   `tokenCallback` and blocking the engine worker until the reply arrives
//! - [`pending_request`] builds the single-use completion slot behind each
//!   round trip
//!
//! ## Features
//!
//! - First completion wins, duplicates are ignored
//! - A dropped request releases the waiting worker with an error
//! - Optional round-trip timeout
//! - Token lifecycle events on the runtime event bus

pub mod bridge;
pub mod error;
pub mod pending;
pub mod provider;

pub use bridge::TokenCallbackBridge;
pub use error::{Result, TokenError};
pub use pending::{pending_request, PendingTokenRequest, TokenCompleter};
pub use provider::{StaticTokenProvider, TokenProvider};
