//! The middleware contract: optional hooks with default no-ops, explicit
//! ordering, and independent blocking-path support.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::mediator::DispatchContext;
use crate::message::{Message, MessageKey};

/// Specificity tier used to order middleware with equal explicit `order`:
/// message-specific entries wrap closest to the handler registration order
/// first, catch-all entries last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareScope {
    /// Applies to specific concrete message types.
    Message,
    /// Applies to a family of message types.
    Family,
    /// Applies to every message.
    Global,
}

impl MiddlewareScope {
    pub(crate) fn rank(self) -> u8 {
        match self {
            MiddlewareScope::Message => 0,
            MiddlewareScope::Family => 1,
            MiddlewareScope::Global => 2,
        }
    }
}

/// Decision returned by a `Before` phase.
pub enum PipelineControl {
    /// Continue to the next phase.
    Next,
    /// Continue, stashing a value in the pipeline state for later phases.
    NextWith(Box<dyn Any + Send>),
    /// Skip the remaining `Before` phases and the handler body; the carried
    /// value becomes the handler result seen by `After`/`Finally` and the
    /// caller.
    ShortCircuit(Box<dyn Any + Send>),
}

impl fmt::Debug for PipelineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineControl::Next => f.write_str("Next"),
            PipelineControl::NextWith(_) => f.write_str("NextWith(..)"),
            PipelineControl::ShortCircuit(_) => f.write_str("ShortCircuit(..)"),
        }
    }
}

/// Type-keyed state shared by every phase of one pipeline execution.
///
/// Values are keyed by their concrete type, one slot per type.
#[derive(Default)]
pub struct PipelineState {
    slots: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + 'static>(&mut self, value: T) {
        self.slots.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub(crate) fn insert_boxed(&mut self, value: Box<dyn Any + Send>) {
        self.slots.insert((*value).type_id(), value);
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.slots
            .remove(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineState")
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// A middleware entry wrapping handler invocations with optional
/// before/after/finally phases.
///
/// All hooks default to no-ops, so an implementation overrides only the
/// phases it needs. A middleware that supports the blocking dispatch path
/// returns `true` from [`supports_blocking`](Middleware::supports_blocking)
/// and overrides the `*_blocking` variants; the async hooks remain the ones
/// used on the async path.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Explicit ordering; lower wraps first. Unset sorts last.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Specificity tier for ordering among equal `order` values.
    fn scope(&self) -> MiddlewareScope {
        MiddlewareScope::Global
    }

    /// Whether this middleware participates in pipelines for the given
    /// message key.
    fn applies_to(&self, _key: &MessageKey) -> bool {
        true
    }

    /// Whether the `*_blocking` hooks are usable on the blocking dispatch
    /// path. A pipeline containing any middleware that returns `false` here
    /// rejects blocking dispatch with `SyncOnAsyncHandler`.
    fn supports_blocking(&self) -> bool {
        false
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        Ok(PipelineControl::Next)
    }

    async fn after(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: &(dyn Any + Send),
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn finally(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: Option<&(dyn Any + Send)>,
        _error: Option<&(dyn StdError + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    fn before_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        Ok(PipelineControl::Next)
    }

    fn after_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: &(dyn Any + Send),
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    fn finally_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: Option<&(dyn Any + Send)>,
        _error: Option<&(dyn StdError + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}
