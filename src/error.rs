//! # Structured Error Handling
//!
//! Central error taxonomy for the mediator. Two families of failures flow
//! through this enum:
//!
//! - **Configuration errors** (`NoHandlerFound`, `AmbiguousHandler`,
//!   `SyncOnAsyncHandler`, `SyncInvokeOnCascadingHandler`,
//!   `ResponseTypeMismatch`): programming mistakes in how handlers and
//!   middleware were wired up. They are hard, non-retryable failures and are
//!   never masked into a default result.
//! - **Execution errors** (`HandlerFailed`, `PublishAggregate`,
//!   `CascadeFailed`): a handler or middleware ran and returned an error.
//!   `publish` aggregation follows the active notification publisher's
//!   policy.
//!
//! Callers can always distinguish "no handler" from "handler ran and failed"
//! from "handler succeeded but a cascaded side effect failed".

use thiserror::Error;

use crate::message::MessageKey;

/// Boxed error produced by user handlers and middleware phases.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A single handler failure collected during publish fan-out.
#[derive(Debug)]
pub struct PublishFailure {
    /// Display form of the failing handler's identity.
    pub handler: String,
    /// The error the handler returned.
    pub error: HandlerError,
}

/// Errors surfaced by `invoke` and `publish` dispatch paths.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// `invoke` found no registration for the message type.
    #[error("no handler registered for message '{message_key}'")]
    NoHandlerFound { message_key: MessageKey },

    /// `invoke` found more than one registration for the message type.
    #[error("{count} handlers registered for message '{message_key}'; invoke requires exactly one (use publish for fan-out)")]
    AmbiguousHandler { message_key: MessageKey, count: usize },

    /// Blocking dispatch reached a handler or middleware with async-only
    /// phases.
    #[error("blocking dispatch of '{message_key}' requires a fully synchronous handler and middleware chain: {reason}")]
    SyncOnAsyncHandler { message_key: MessageKey, reason: String },

    /// Blocking dispatch reached a handler that emits cascading messages;
    /// cascades require awaiting a publish fan-out.
    #[error("handler for '{message_key}' emits cascading messages and must be dispatched asynchronously")]
    SyncInvokeOnCascadingHandler { message_key: MessageKey },

    /// The handler's response could not be downcast to the response type the
    /// caller requested.
    #[error("handler for '{message_key}' did not produce a response of type {expected}")]
    ResponseTypeMismatch {
        message_key: MessageKey,
        expected: &'static str,
    },

    /// A handler or middleware phase returned an error during `invoke`, or
    /// the sole registered handler failed during `publish`.
    #[error("handler '{handler}' failed for message '{message_key}': {source}")]
    HandlerFailed {
        message_key: MessageKey,
        handler: String,
        #[source]
        source: HandlerError,
    },

    /// One or more handlers failed during publish fan-out. Every failure is
    /// collected; no handler is skipped because an earlier one failed.
    #[error("publish of '{message_key}' completed with {} handler failure(s) out of {total}", .failures.len())]
    PublishAggregate {
        message_key: MessageKey,
        total: usize,
        failures: Vec<PublishFailure>,
    },

    /// A cascaded publish failed after the primary handler result was
    /// already finalized. Distinct from `HandlerFailed` so callers can
    /// attribute the failure to the cascade, not the primary handler.
    #[error("cascaded publish of '{cascade_key}' failed after '{message_key}' completed")]
    CascadeFailed {
        message_key: MessageKey,
        cascade_key: MessageKey,
        #[source]
        source: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Whether this error indicates a wiring mistake rather than a runtime
    /// handler failure.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DispatchError::NoHandlerFound { .. }
                | DispatchError::AmbiguousHandler { .. }
                | DispatchError::SyncOnAsyncHandler { .. }
                | DispatchError::SyncInvokeOnCascadingHandler { .. }
                | DispatchError::ResponseTypeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_flagged() {
        let err = DispatchError::NoHandlerFound {
            message_key: MessageKey::named("orders::PlaceOrder"),
        };
        assert!(err.is_configuration_error());

        let err = DispatchError::HandlerFailed {
            message_key: MessageKey::named("orders::PlaceOrder"),
            handler: "OrderHandler::handle".to_string(),
            source: "boom".into(),
        };
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn aggregate_display_counts_failures() {
        let err = DispatchError::PublishAggregate {
            message_key: MessageKey::named("orders::OrderPlaced"),
            total: 3,
            failures: vec![
                PublishFailure {
                    handler: "A::handle".to_string(),
                    error: "first".into(),
                },
                PublishFailure {
                    handler: "B::handle".to_string(),
                    error: "second".into(),
                },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("2 handler failure(s)"));
        assert!(rendered.contains("out of 3"));
    }
}
