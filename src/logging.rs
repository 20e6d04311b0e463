//! # Structured Logging Module
//!
//! Opt-in tracing initialization for binaries and tests. The library itself
//! only emits `tracing` events; it never installs a subscriber implicitly.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with an environment-driven filter.
///
/// Honors `RUST_LOG`; defaults to `info` when unset. Safe to call more than
/// once, and a no-op when another subscriber is already installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        );

        // Another subscriber may already be installed by the host
        // application; keep it.
        let _ = subscriber.try_init();
    });
}
