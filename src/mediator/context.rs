//! Per-call-chain dispatch context: the mediator handle, the shared
//! execution scope, and the correlation id carried by every log line of the
//! chain.
//!
//! Handlers and middleware receive the context and use it for nested
//! dispatch. Nested calls retain the caller's scope, so one logical call
//! chain holds exactly one resource scope no matter how deeply dispatches
//! nest.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{ErasedMessage, Message};
use crate::resolver::ServiceResolver;
use crate::scope::ExecutionScope;

use super::mediator::Mediator;

/// Context threaded through every handler and middleware phase of one
/// logical call chain.
#[derive(Clone)]
pub struct DispatchContext {
    mediator: Mediator,
    scope: ExecutionScope,
    correlation_id: Uuid,
    depth: usize,
}

impl DispatchContext {
    /// Root context for a new external call.
    pub(crate) fn root(mediator: Mediator) -> Self {
        let scope = ExecutionScope::enter(mediator.resolver());
        Self {
            mediator,
            scope,
            correlation_id: Uuid::new_v4(),
            depth: 0,
        }
    }

    /// Context for a dispatch nested inside this chain; shares the scope.
    pub(crate) fn nested(&self) -> Self {
        Self {
            mediator: self.mediator.clone(),
            scope: self.scope.retain(),
            correlation_id: self.correlation_id,
            depth: self.depth + 1,
        }
    }

    /// Correlation id of the external call this chain originated from.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Nesting depth; zero for the external entry call.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn scope(&self) -> &ExecutionScope {
        &self.scope
    }

    pub fn resolver(&self) -> &Arc<dyn ServiceResolver> {
        self.mediator.resolver()
    }

    pub(crate) fn mediator(&self) -> &Mediator {
        &self.mediator
    }

    /// Nested request/response dispatch sharing this chain's scope.
    pub async fn invoke<M, R>(&self, message: M, cancel: CancellationToken) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let ctx = self.nested();
        let result = Mediator::invoke_in(&ctx, message, cancel).await;
        ctx.scope.release().await;
        result
    }

    /// Nested publish fan-out sharing this chain's scope.
    pub async fn publish<M: Message>(&self, message: M, cancel: CancellationToken) -> Result<()> {
        self.publish_erased(Arc::new(message), cancel).await
    }

    /// Nested publish of an already-erased message (cascading re-publish).
    pub async fn publish_erased(
        &self,
        message: ErasedMessage,
        cancel: CancellationToken,
    ) -> Result<()> {
        let ctx = self.nested();
        let result = Mediator::publish_in(&ctx, message, cancel).await;
        ctx.scope.release().await;
        result
    }

    /// Nested blocking dispatch; subject to the same synchronous-chain
    /// rules as the public blocking façade.
    pub fn invoke_blocking<M, R>(&self, message: M, cancel: CancellationToken) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let ctx = self.nested();
        let result = Mediator::invoke_blocking_in(&ctx, message, cancel);
        ctx.scope.release_blocking();
        result
    }

    /// Nested blocking publish fan-out.
    pub fn publish_blocking<M: Message>(&self, message: M, cancel: CancellationToken) -> Result<()> {
        let ctx = self.nested();
        let result = Mediator::publish_blocking_in(&ctx, Arc::new(message), cancel);
        ctx.scope.release_blocking();
        result
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("correlation_id", &self.correlation_id)
            .field("depth", &self.depth)
            .field("scope", &self.scope)
            .finish()
    }
}
