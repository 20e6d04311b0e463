//! # Middleware Pipeline
//!
//! Ordered before/after/finally hooks wrapping a single handler invocation.
//!
//! `Before` phases run in ascending order and may short-circuit, skipping
//! the remaining `Before` phases and the handler body. `After` phases run in
//! descending order on success, and `Finally` phases run in descending order
//! unconditionally. Phase-to-phase values travel through a type-keyed
//! [`PipelineState`].

pub mod middleware;
#[allow(clippy::module_inception)]
pub mod pipeline;

pub use middleware::{Middleware, MiddlewareScope, PipelineControl, PipelineState};
pub use pipeline::MiddlewarePipeline;
