//! # Crypto Engine
//!
//! Engine-side contracts of the bridge and a reference implementation.
//!
//! ## Overview
//!
//! The bridge never performs cryptography itself. It drives a
//! [`CryptoEngine`] per initialized instance and a [`RatchetChannel`] per
//! established peer session. Engines are built through an [`EngineFactory`]
//! and report failures as [`EngineError`] values tagged with an
//! [`ErrorKind`], which the service layer translates into wire codes.
//!
//! ## Modules
//!
//! - [`engine`]: capability traits and construction parameters
//! - [`card`]: self-signed public identity cards
//! - [`storage`]: per-identity key storage
//! - [`local`]: in-process engine with a shared key directory
//! - [`error`]: engine error type and well-known messages

pub mod card;
pub mod engine;
pub mod error;
pub mod local;
pub mod storage;

pub use card::Card;
pub use engine::{CryptoEngine, EngineFactory, EngineParams, FindUsersResult, RatchetChannel};
pub use error::{messages, EngineError, ErrorKind, Result};
pub use local::{LocalCloud, LocalEngine, LocalEngineFactory, StorageLocation};
pub use storage::{FileKeyStorage, KeyStorage, MemoryKeyStorage};

#[cfg(any(test, feature = "mocks"))]
pub use engine::{MockCryptoEngine, MockRatchetChannel};
