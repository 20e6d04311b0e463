//! Pipeline executor: threads one handler invocation through the sorted
//! middleware chain on the async or blocking path.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::HandlerError;
use crate::mediator::DispatchContext;
use crate::message::{ErasedMessage, MessageKey};
use crate::registry::{AsyncInvokeFn, BlockingInvokeFn, DispatchOutcome};

use super::middleware::{Middleware, PipelineControl, PipelineState};

/// The ordered middleware chain assembled for one message key, shared by
/// every dispatch of that key through the cached plan.
#[derive(Clone)]
pub struct MiddlewarePipeline {
    entries: Arc<[Arc<dyn Middleware>]>,
}

impl MiddlewarePipeline {
    /// Select and sort the middleware applicable to `key`: explicit order
    /// first (unset last), then specificity tier, then registration order.
    pub(crate) fn assemble(all: &[Arc<dyn Middleware>], key: &MessageKey) -> Self {
        let mut selected: Vec<(usize, Arc<dyn Middleware>)> = all
            .iter()
            .enumerate()
            .filter(|(_, middleware)| middleware.applies_to(key))
            .map(|(index, middleware)| (index, Arc::clone(middleware)))
            .collect();
        selected.sort_by_key(|(index, middleware)| {
            (
                middleware.order().map(i64::from).unwrap_or(i64::MAX),
                middleware.scope().rank(),
                *index,
            )
        });
        Self {
            entries: selected
                .into_iter()
                .map(|(_, middleware)| middleware)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name of the first middleware without blocking phases, if any.
    pub(crate) fn first_async_entry(&self) -> Option<&str> {
        self.entries
            .iter()
            .find(|middleware| !middleware.supports_blocking())
            .map(|middleware| middleware.name())
    }

    /// Run the async pipeline: ascending `before` phases (with
    /// short-circuit), the handler body, descending `after` phases on
    /// success, and descending `finally` phases unconditionally.
    ///
    /// A failing `finally` phase replaces the in-flight failure; among
    /// multiple `finally` failures the first wins. A replaced failure is
    /// logged, never silently dropped.
    pub(crate) async fn execute(
        &self,
        ctx: &DispatchContext,
        message: &ErasedMessage,
        cancel: &CancellationToken,
        handler: &AsyncInvokeFn,
    ) -> Result<DispatchOutcome, HandlerError> {
        let mut state = PipelineState::new();
        let mut outcome: Option<DispatchOutcome> = None;
        let mut error: Option<HandlerError> = None;

        for middleware in self.entries.iter() {
            match middleware
                .before(ctx, message.as_ref(), &mut state, cancel)
                .await
            {
                Ok(PipelineControl::Next) => {}
                Ok(PipelineControl::NextWith(value)) => state.insert_boxed(value),
                Ok(PipelineControl::ShortCircuit(value)) => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        middleware = middleware.name(),
                        "before phase short-circuited the pipeline"
                    );
                    outcome = Some(DispatchOutcome::short_circuit(value));
                    break;
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if error.is_none() && outcome.is_none() {
            match (handler.as_ref())(ctx.clone(), Arc::clone(message), cancel.clone()).await {
                Ok(handler_outcome) => outcome = Some(handler_outcome),
                Err(e) => error = Some(e),
            }
        }

        if error.is_none() {
            if let Some(current) = outcome.as_ref() {
                for middleware in self.entries.iter().rev() {
                    if let Err(e) = middleware
                        .after(ctx, message.as_ref(), current.response_ref(), &mut state, cancel)
                        .await
                    {
                        error = Some(e);
                        break;
                    }
                }
            }
        }

        let mut finally_error: Option<HandlerError> = None;
        for middleware in self.entries.iter().rev() {
            let result = middleware
                .finally(
                    ctx,
                    message.as_ref(),
                    outcome.as_ref().map(DispatchOutcome::response_ref),
                    error.as_deref(),
                    &mut state,
                )
                .await;
            if let Err(e) = result {
                if finally_error.is_none() {
                    finally_error = Some(e);
                } else {
                    warn!(
                        correlation_id = %ctx.correlation_id(),
                        middleware = middleware.name(),
                        error = %e,
                        "additional finally-phase failure; first failure wins"
                    );
                }
            }
        }

        if let Some(finally_error) = finally_error {
            if let Some(replaced) = error.take() {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    replaced = %replaced,
                    "in-flight failure replaced by finally-phase failure"
                );
            }
            return Err(finally_error);
        }
        if let Some(error) = error {
            return Err(error);
        }
        outcome.ok_or_else(|| HandlerError::from("pipeline completed without an outcome"))
    }

    /// Blocking mirror of [`execute`](Self::execute) using the `*_blocking`
    /// phases and a blocking invocation delegate. Callers must have already
    /// verified that every entry supports the blocking path.
    pub(crate) fn execute_blocking(
        &self,
        ctx: &DispatchContext,
        message: &ErasedMessage,
        cancel: &CancellationToken,
        handler: &BlockingInvokeFn,
    ) -> Result<DispatchOutcome, HandlerError> {
        let mut state = PipelineState::new();
        let mut outcome: Option<DispatchOutcome> = None;
        let mut error: Option<HandlerError> = None;

        for middleware in self.entries.iter() {
            match middleware.before_blocking(ctx, message.as_ref(), &mut state, cancel) {
                Ok(PipelineControl::Next) => {}
                Ok(PipelineControl::NextWith(value)) => state.insert_boxed(value),
                Ok(PipelineControl::ShortCircuit(value)) => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        middleware = middleware.name(),
                        "blocking before phase short-circuited the pipeline"
                    );
                    outcome = Some(DispatchOutcome::short_circuit(value));
                    break;
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if error.is_none() && outcome.is_none() {
            match (handler.as_ref())(ctx.clone(), Arc::clone(message), cancel.clone()) {
                Ok(handler_outcome) => outcome = Some(handler_outcome),
                Err(e) => error = Some(e),
            }
        }

        if error.is_none() {
            if let Some(current) = outcome.as_ref() {
                for middleware in self.entries.iter().rev() {
                    if let Err(e) = middleware.after_blocking(
                        ctx,
                        message.as_ref(),
                        current.response_ref(),
                        &mut state,
                        cancel,
                    ) {
                        error = Some(e);
                        break;
                    }
                }
            }
        }

        let mut finally_error: Option<HandlerError> = None;
        for middleware in self.entries.iter().rev() {
            let result = middleware.finally_blocking(
                ctx,
                message.as_ref(),
                outcome.as_ref().map(DispatchOutcome::response_ref),
                error.as_deref(),
                &mut state,
            );
            if let Err(e) = result {
                if finally_error.is_none() {
                    finally_error = Some(e);
                }
            }
        }

        if let Some(finally_error) = finally_error {
            if let Some(replaced) = error.take() {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    replaced = %replaced,
                    "in-flight failure replaced by finally-phase failure"
                );
            }
            return Err(finally_error);
        }
        if let Some(error) = error {
            return Err(error);
        }
        outcome.ok_or_else(|| HandlerError::from("pipeline completed without an outcome"))
    }
}

impl std::fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field("entries", &self.entries.len())
            .finish()
    }
}
