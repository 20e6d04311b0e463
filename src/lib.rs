#![allow(clippy::doc_markdown)] // Allow technical terms in docs without backticks
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Mediator Core
//!
//! In-process message mediator for request/response and publish/subscribe
//! dispatch within a single process.
//!
//! ## Overview
//!
//! Messages route by a canonical type key. `invoke` resolves exactly one
//! handler and returns its response; `publish` fans out to every applicable
//! handler, polymorphically across family keys and the catch-all, through a
//! configurable notification publisher strategy. Every handler invocation
//! runs inside an ordered middleware pipeline with before/after/finally
//! phases, short-circuiting, and phase-to-phase state passing. Handlers may
//! cascade secondary messages that are re-published once their primary
//! response is finalized.
//!
//! ## Module Organization
//!
//! - [`message`] - Message trait, canonical routing keys, family keys
//! - [`handler`] - Typed handler contracts erased at registration
//! - [`registry`] - Handler table with polymorphic, deduplicated lookup
//! - [`pipeline`] - Middleware contract and pipeline executor
//! - [`publisher`] - Sequential / concurrent / fire-and-forget fan-out
//! - [`mediator`] - The dispatch façade, builder, and plan caches
//! - [`scope`] - Reference-counted per-call-chain resource scopes
//! - [`resolver`] - Service resolver boundary and in-crate default
//! - [`config`] - Layered configuration loading
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use mediator_core::{
//!     impl_message, CancellationToken, DispatchContext, HandlerError, Mediator,
//!     RequestHandler,
//! };
//!
//! struct Ping(String);
//! impl_message!(Ping);
//!
//! struct PingHandler;
//!
//! #[async_trait]
//! impl RequestHandler<Ping> for PingHandler {
//!     type Response = String;
//!
//!     async fn handle(
//!         &self,
//!         message: &Ping,
//!         _ctx: &DispatchContext,
//!         _cancel: &CancellationToken,
//!     ) -> Result<String, HandlerError> {
//!         Ok(format!("{} Pong", message.0))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mediator = Mediator::builder()
//!     .register::<Ping, _>(Arc::new(PingHandler))
//!     .build();
//!
//! let reply: String = mediator
//!     .invoke(Ping("hi".to_string()), CancellationToken::new())
//!     .await?;
//! assert_eq!(reply, "hi Pong");
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! The registry is immutable after build; dispatch-plan caches populate on
//! first use behind concurrent insert-if-absent and are immutable once
//! populated. Execution scopes are per logical call chain and never shared
//! through globals or thread-locals. Cancellation is cooperative: the token
//! is threaded through every delegate and nothing is forcibly aborted.

pub mod config;
pub mod constants;
pub mod error;
pub mod handler;
pub mod logging;
pub mod mediator;
pub mod message;
pub mod pipeline;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod scope;

pub use config::{MediatorConfig, PublishStrategyKind};
pub use error::{DispatchError, HandlerError, PublishFailure, Result};
pub use handler::{
    BlockingNotificationHandler, BlockingRequestHandler, CascadingHandler,
    ErasedNotificationHandler, NotificationHandler, Outcome, RequestHandler,
};
pub use logging::init_structured_logging;
pub use mediator::{DispatchContext, Mediator, MediatorBuilder, MediatorStats};
pub use message::{ErasedMessage, Message, MessageKey};
pub use pipeline::{Middleware, MiddlewarePipeline, MiddlewareScope, PipelineControl, PipelineState};
pub use publisher::{
    ConcurrentPublisher, FireAndForgetPublisher, NotificationPublisher, PublishTarget,
    SequentialPublisher,
};
pub use registry::{
    AsyncInvokeFn, AsyncPublishFn, BlockingInvokeFn, DispatchOutcome, HandlerId,
    HandlerRegistration, HandlerRegistry, RegistryStats,
};
pub use resolver::{
    ResolvedMiddleware, ServiceResolver, SharedService, SimpleServiceResolver, SimpleServiceScope,
};
pub use scope::{ExecutionScope, ServiceScope};

// Re-exported so downstream signatures match the delegate shapes without an
// extra dependency declaration.
pub use tokio_util::sync::CancellationToken;
