//! # Mediator Configuration
//!
//! Explicit, validated configuration for the dispatch core. Values load in
//! layers: built-in defaults, then an optional `mediator.toml`, then
//! `MEDIATOR_*` environment overrides. No silent fallbacks beyond the
//! documented defaults.

use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_FILE_BASENAME, ENV_PREFIX};

/// Notification publisher strategy selected at configuration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStrategyKind {
    /// Handlers run one at a time in registration order.
    #[default]
    Sequential,
    /// All handlers start before any completion is awaited.
    ConcurrentWaitAll,
    /// Handlers run detached; failures are swallowed.
    FireAndForget,
}

impl PublishStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStrategyKind::Sequential => "sequential",
            PublishStrategyKind::ConcurrentWaitAll => "concurrent-wait-all",
            PublishStrategyKind::FireAndForget => "fire-and-forget",
        }
    }
}

/// Configuration for a mediator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Fan-out strategy for `publish` dispatches.
    pub publish_strategy: PublishStrategyKind,
    /// Run blocking-path validation when the mediator is built, logging
    /// registrations that can never be dispatched synchronously.
    pub validate_on_build: bool,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            publish_strategy: PublishStrategyKind::default(),
            validate_on_build: true,
        }
    }
}

impl MediatorConfig {
    /// Load configuration from the layered sources: defaults, optional
    /// `mediator.toml` in the working directory, then `MEDIATOR_*`
    /// environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE_BASENAME).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;
        settings.try_deserialize()
    }

    /// Load configuration from an explicit file path plus environment
    /// overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;
        settings.try_deserialize()
    }
}
