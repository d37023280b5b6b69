//! # Bridge Configuration
//!
//! Configuration for the E3Kit bridge core.
//!
//! ## Overview
//!
//! [`BridgeConfig`] is assembled through [`BridgeConfigBuilder`] and validated
//! fail-fast before any instance is created. Every field has a default that
//! matches the host library's channel contract, so most hosts only override
//! the token timeout or the key storage location.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::BridgeConfig;
//! use std::time::Duration;
//!
//! let config = BridgeConfig::builder()
//!     .token_timeout(Some(Duration::from_secs(30)))
//!     .storage_dir("/var/lib/e3kit")
//!     .build()?;
//! ```
//!
//! ## Environment overlay
//!
//! [`BridgeConfigBuilder::from_env`] seeds a builder from process variables:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `E3KIT_BRIDGE_CHANNEL` | channel name |
//! | `E3KIT_BRIDGE_TOKEN_TIMEOUT_SECS` | token timeout, `0` disables it |
//! | `E3KIT_BRIDGE_ENABLE_RATCHET` | default ratchet flag (`true`/`false`/`1`/`0`) |
//! | `E3KIT_BRIDGE_STORAGE_DIR` | key storage directory |

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHANNEL_NAME: &str = "plugins.virgilsecurity.com/e3kit";
pub const DEFAULT_INSTANCE_ID_KEY: &str = "_id";
pub const DEFAULT_TOKEN_CALLBACK_METHOD: &str = "tokenCallback";
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

pub const ENV_CHANNEL: &str = "E3KIT_BRIDGE_CHANNEL";
pub const ENV_TOKEN_TIMEOUT_SECS: &str = "E3KIT_BRIDGE_TOKEN_TIMEOUT_SECS";
pub const ENV_ENABLE_RATCHET: &str = "E3KIT_BRIDGE_ENABLE_RATCHET";
pub const ENV_STORAGE_DIR: &str = "E3KIT_BRIDGE_STORAGE_DIR";

/// Runtime settings shared by the registry, dispatcher and token bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of the method channel the host registers the bridge under.
    pub channel_name: String,
    /// Argument key carrying the instance id in every call.
    pub instance_id_key: String,
    /// Method invoked on the host when an engine needs a fresh token.
    pub token_callback_method: String,
    /// Upper bound on a token round trip. `None` waits forever.
    pub token_timeout: Option<Duration>,
    /// Ratchet flag used when `init` does not carry `enableRatchet`.
    pub enable_ratchet: bool,
    /// Directory for engine key storage. `None` keeps keys in memory.
    pub storage_dir: Option<PathBuf>,
    /// Per-subscriber buffer of the event bus.
    pub event_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            instance_id_key: DEFAULT_INSTANCE_ID_KEY.to_string(),
            token_callback_method: DEFAULT_TOKEN_CALLBACK_METHOD.to_string(),
            token_timeout: Some(DEFAULT_TOKEN_TIMEOUT),
            enable_ratchet: true,
            storage_dir: None,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Creates a new builder seeded with defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Defaults overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        BridgeConfigBuilder::from_env()?.build()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - channel name, instance id key and callback method are non-empty
    /// - a configured token timeout is non-zero
    /// - the event buffer holds at least one event
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.trim().is_empty() {
            return Err(Error::Config("Channel name cannot be empty".to_string()));
        }

        if self.instance_id_key.trim().is_empty() {
            return Err(Error::Config(
                "Instance id argument key cannot be empty".to_string(),
            ));
        }

        if self.token_callback_method.trim().is_empty() {
            return Err(Error::Config(
                "Token callback method name cannot be empty".to_string(),
            ));
        }

        if self.token_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Token timeout must be greater than zero. Use None to wait without a limit."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if let Some(dir) = &self.storage_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("Storage directory cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Default, Clone)]
pub struct BridgeConfigBuilder {
    channel_name: Option<String>,
    instance_id_key: Option<String>,
    token_callback_method: Option<String>,
    token_timeout: Option<Option<Duration>>,
    enable_ratchet: Option<bool>,
    storage_dir: Option<PathBuf>,
    event_buffer_size: Option<usize>,
}

impl BridgeConfigBuilder {
    /// Seeds a builder from `E3KIT_BRIDGE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::default();

        if let Some(channel) = lookup(ENV_CHANNEL) {
            builder = builder.channel_name(channel);
        }

        if let Some(raw) = lookup(ENV_TOKEN_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of seconds, got '{}'",
                    ENV_TOKEN_TIMEOUT_SECS, raw
                ))
            })?;
            builder = builder.token_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }

        if let Some(raw) = lookup(ENV_ENABLE_RATCHET) {
            let enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(Error::Config(format!(
                        "{} must be a boolean, got '{}'",
                        ENV_ENABLE_RATCHET, raw
                    )))
                }
            };
            builder = builder.enable_ratchet(enabled);
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            builder = builder.storage_dir(dir);
        }

        Ok(builder)
    }

    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_name = Some(name.into());
        self
    }

    /// Overrides the argument key that carries the instance id (`_id`).
    pub fn instance_id_key(mut self, key: impl Into<String>) -> Self {
        self.instance_id_key = Some(key.into());
        self
    }

    pub fn token_callback_method(mut self, method: impl Into<String>) -> Self {
        self.token_callback_method = Some(method.into());
        self
    }

    /// Sets the token round-trip limit. `None` disables the timeout.
    pub fn token_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.token_timeout = Some(timeout);
        self
    }

    pub fn enable_ratchet(mut self, enabled: bool) -> Self {
        self.enable_ratchet = Some(enabled);
        self
    }

    pub fn storage_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_dir = Some(path.into());
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when validation fails.
    pub fn build(self) -> Result<BridgeConfig> {
        let defaults = BridgeConfig::default();

        let config = BridgeConfig {
            channel_name: self.channel_name.unwrap_or(defaults.channel_name),
            instance_id_key: self.instance_id_key.unwrap_or(defaults.instance_id_key),
            token_callback_method: self
                .token_callback_method
                .unwrap_or(defaults.token_callback_method),
            token_timeout: self.token_timeout.unwrap_or(defaults.token_timeout),
            enable_ratchet: self.enable_ratchet.unwrap_or(defaults.enable_ratchet),
            storage_dir: self.storage_dir.or(defaults.storage_dir),
            event_buffer_size: self.event_buffer_size.unwrap_or(defaults.event_buffer_size),
        };

        config.validate()?;

        Ok(config)
    }
}
