//! Erased handler invocation forms and the registration entry stored in the
//! registry.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::mediator::DispatchContext;
use crate::message::{canonical_type_key, ErasedMessage, MessageKey};

/// Async invocation delegate: runs the handler and yields its outcome.
pub type AsyncInvokeFn = Arc<
    dyn Fn(
            DispatchContext,
            ErasedMessage,
            CancellationToken,
        ) -> BoxFuture<'static, std::result::Result<DispatchOutcome, HandlerError>>
        + Send
        + Sync,
>;

/// Blocking invocation delegate with the same shape minus asynchrony.
pub type BlockingInvokeFn = Arc<
    dyn Fn(
            DispatchContext,
            ErasedMessage,
            CancellationToken,
        ) -> std::result::Result<DispatchOutcome, HandlerError>
        + Send
        + Sync,
>;

/// Publish delegate: discards the response value so fan-out over void
/// handlers never allocates an unused result.
pub type AsyncPublishFn = Arc<
    dyn Fn(
            DispatchContext,
            ErasedMessage,
            CancellationToken,
        ) -> BoxFuture<'static, std::result::Result<(), HandlerError>>
        + Send
        + Sync,
>;

/// The pipeline's handler-result envelope: the primary response plus any
/// cascading messages the handler emitted.
pub struct DispatchOutcome {
    pub(crate) response: Box<dyn Any + Send>,
    pub(crate) cascades: Vec<ErasedMessage>,
}

impl DispatchOutcome {
    /// Outcome carrying only a primary response.
    pub fn response<R: Send + 'static>(response: R) -> Self {
        Self {
            response: Box::new(response),
            cascades: Vec::new(),
        }
    }

    /// Outcome carrying a primary response and cascading messages.
    pub fn with_cascades<R: Send + 'static>(response: R, cascades: Vec<ErasedMessage>) -> Self {
        Self {
            response: Box::new(response),
            cascades,
        }
    }

    /// Outcome of a void handler.
    pub fn unit() -> Self {
        Self::response(())
    }

    /// Outcome substituted by a short-circuiting middleware phase.
    pub(crate) fn short_circuit(response: Box<dyn Any + Send>) -> Self {
        Self {
            response,
            cascades: Vec::new(),
        }
    }

    pub fn has_cascades(&self) -> bool {
        !self.cascades.is_empty()
    }

    pub(crate) fn response_ref(&self) -> &(dyn Any + Send) {
        self.response.as_ref()
    }
}

impl fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchOutcome")
            .field("cascades", &self.cascades.len())
            .finish()
    }
}

/// Identity of a physical handler method, the second half of the fan-out
/// deduplication composite `(message_key, handler_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    handler_type: String,
    method: &'static str,
}

impl HandlerId {
    /// Identity from the handler's concrete type and method name.
    pub fn of<H: ?Sized + 'static>(method: &'static str) -> Self {
        Self {
            handler_type: canonical_type_key(std::any::type_name::<H>()),
            method,
        }
    }

    /// Identity from an application-chosen name (keyed-resolver handlers).
    pub fn named(handler_type: impl Into<String>, method: &'static str) -> Self {
        Self {
            handler_type: handler_type.into(),
            method,
        }
    }

    pub fn handler_type(&self) -> &str {
        &self.handler_type
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.handler_type, self.method)
    }
}

/// One registered handler entry for a message-type key.
#[derive(Clone)]
pub struct HandlerRegistration {
    /// The message-type key this entry was declared under.
    pub message_key: MessageKey,
    /// Physical handler identity used for fan-out deduplication.
    pub handler_id: HandlerId,
    /// Async invocation form.
    pub invoke: AsyncInvokeFn,
    /// Blocking invocation form; `None` for async-only handlers.
    pub invoke_blocking: Option<BlockingInvokeFn>,
    /// Fan-out form discarding the response value.
    pub publish: AsyncPublishFn,
    /// Fan-out sequencing; lower runs first, unset sorts last.
    pub order: Option<i32>,
    /// Whether the handler body is asynchronous.
    pub is_async: bool,
    /// Whether the handler emits cascading messages (async-only dispatch).
    pub cascading: bool,
    pub registered_at: DateTime<Utc>,
}

impl HandlerRegistration {
    pub(crate) fn sort_order(&self) -> i64 {
        self.order.map(i64::from).unwrap_or(i64::MAX)
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("message_key", &self.message_key)
            .field("handler_id", &self.handler_id)
            .field("order", &self.order)
            .field("is_async", &self.is_async)
            .field("cascading", &self.cascading)
            .field("blocking_capable", &self.invoke_blocking.is_some())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}
