//! # Mediator Façade
//!
//! The caller-facing dispatch surface. `invoke` routes a message to exactly
//! one handler and returns its response; `publish` fans a message out to
//! every applicable handler through the configured notification publisher.
//! Both have blocking variants that are only valid when the resolved
//! handler and middleware chain are fully synchronous.
//!
//! Resolved dispatch plans (handler registration + assembled middleware
//! pipeline) are cached per message key after first use; cache entries are
//! immutable once populated and safe for concurrent reads.

pub mod context;
#[allow(clippy::module_inception)]
pub mod mediator;

pub use context::DispatchContext;
pub use mediator::{Mediator, MediatorBuilder, MediatorStats};
