//! # Notification Publisher Strategies
//!
//! A notification publisher decides how a publish fan-out invokes the set of
//! handler delegates for one message: one at a time in registration order,
//! all at once, or detached fire-and-forget. The strategy is selected once
//! at configuration time and shared process-wide.
//!
//! Sequential and concurrent strategies guarantee that **every** handler
//! runs regardless of earlier failures and then surface all collected
//! failures at once. With exactly one registered handler both strategies
//! deliberately pass the failure through as `HandlerFailed` instead of
//! wrapping it in a one-element aggregate. Fire-and-forget swallows
//! failures by design.

pub mod concurrent;
pub mod fire_and_forget;
pub mod sequential;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::PublishStrategyKind;
use crate::error::{DispatchError, HandlerError, PublishFailure, Result};
use crate::message::MessageKey;
use crate::registry::HandlerId;

pub use concurrent::ConcurrentPublisher;
pub use fire_and_forget::FireAndForgetPublisher;
pub use sequential::SequentialPublisher;

/// One handler delegate prepared for fan-out. The wrapped closure runs the
/// handler through its middleware pipeline; nothing executes until the
/// strategy starts it.
pub struct PublishTarget {
    handler: HandlerId,
    invoke: Box<
        dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), HandlerError>> + Send,
    >,
}

impl PublishTarget {
    pub fn new(
        handler: HandlerId,
        invoke: impl FnOnce() -> BoxFuture<'static, std::result::Result<(), HandlerError>>
            + Send
            + 'static,
    ) -> Self {
        Self {
            handler,
            invoke: Box::new(invoke),
        }
    }

    /// Begin the delegate, yielding its identity and the in-flight future.
    pub fn start(
        self,
    ) -> (
        HandlerId,
        BoxFuture<'static, std::result::Result<(), HandlerError>>,
    ) {
        (self.handler, (self.invoke)())
    }
}

impl std::fmt::Debug for PublishTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishTarget")
            .field("handler", &self.handler)
            .finish()
    }
}

/// Strategy contract for publish fan-out.
#[async_trait]
pub trait NotificationPublisher: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Invoke every target for one published message, aggregating failures
    /// per the strategy's policy. Zero targets completes immediately.
    async fn publish_all(
        &self,
        message_key: &MessageKey,
        targets: Vec<PublishTarget>,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Construct the process-wide strategy instance for a configured kind.
pub fn for_kind(kind: PublishStrategyKind) -> Arc<dyn NotificationPublisher> {
    match kind {
        PublishStrategyKind::Sequential => Arc::new(SequentialPublisher),
        PublishStrategyKind::ConcurrentWaitAll => Arc::new(ConcurrentPublisher),
        PublishStrategyKind::FireAndForget => Arc::new(FireAndForgetPublisher),
    }
}

/// Fold collected failures into the publish result: no failures is `Ok`,
/// a single-target failure passes through, anything else aggregates.
pub(crate) fn into_publish_result(
    message_key: &MessageKey,
    total: usize,
    mut failures: Vec<PublishFailure>,
) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    if total == 1 {
        if let Some(failure) = failures.pop() {
            return Err(DispatchError::HandlerFailed {
                message_key: message_key.clone(),
                handler: failure.handler,
                source: failure.error,
            });
        }
    }
    Err(DispatchError::PublishAggregate {
        message_key: message_key.clone(),
        total,
        failures,
    })
}
