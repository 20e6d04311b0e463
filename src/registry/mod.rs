//! # Handler Registry
//!
//! Process-wide table mapping message-type keys to registered handler
//! entries. Built once at startup by the mediator builder and immutable
//! afterwards, so lookups are plain shared reads.
//!
//! Each entry carries the erased invocation forms of one handler: the async
//! invoke delegate, an optional blocking delegate (absent for async-only
//! handlers), and a publish delegate that discards the response value and is
//! safe for fan-out.

pub mod handler_registry;
pub mod registration;

pub use handler_registry::{HandlerRegistry, RegistryStats};
pub use registration::{
    AsyncInvokeFn, AsyncPublishFn, BlockingInvokeFn, DispatchOutcome, HandlerId,
    HandlerRegistration,
};
