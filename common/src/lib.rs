//! Shared types for the bridge monitor: configuration loading and NEAR
//! account identifiers.

pub mod account;
pub mod config;

pub use account::{AccountId, AccountIdError};
pub use config::{BridgeConfig, ConfigError};
