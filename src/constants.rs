//! Crate-wide constants shared across configuration and dispatch.

/// Prefix for environment-variable configuration overrides (`MEDIATOR_*`).
pub const ENV_PREFIX: &str = "MEDIATOR";

/// Basename of the optional configuration file (`mediator.toml`).
pub const CONFIG_FILE_BASENAME: &str = "mediator";

/// Routing key that matches every published message, mirroring an
/// `object`-typed catch-all handler registration.
pub const CATCH_ALL_KEY: &str = "*";
