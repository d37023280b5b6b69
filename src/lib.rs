//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map onto the individual workspace crates so
//! host applications can depend on `e3kit-bridge-workspace` and enable the
//! documented features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
