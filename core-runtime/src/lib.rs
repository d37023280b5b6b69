//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the E3Kit bridge:
//! - Logging and tracing setup
//! - Bridge configuration
//! - Event bus
//!
//! ## Overview
//!
//! Every other crate in the workspace depends on this one for its
//! configuration type, its log conventions and the broadcast channel used to
//! publish instance and token lifecycle events.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{BridgeConfig, BridgeConfigBuilder};
pub use error::{Error, Result};
pub use events::{BridgeEvent, EventBus};
