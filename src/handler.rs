//! # Typed Handler Contracts
//!
//! Application handlers implement one of the typed traits in this module;
//! the mediator builder erases them into the registry's delegate forms at
//! registration time. Erasure is the runtime equivalent of generated
//! per-handler dispatch glue: downcast the routed message to its concrete
//! type, call the typed method, box the response.
//!
//! Every handler receives the [`DispatchContext`] so it can issue nested
//! dispatches that share the caller's execution scope, and the cancellation
//! token it is expected to observe cooperatively.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::mediator::DispatchContext;
use crate::message::{ErasedMessage, Message};
use crate::registry::{AsyncInvokeFn, AsyncPublishFn, BlockingInvokeFn, DispatchOutcome};
use crate::resolver::SharedService;

/// Request/response handler. `invoke` requires exactly one registration per
/// message type.
#[async_trait]
pub trait RequestHandler<M: Message>: Send + Sync + 'static {
    type Response: Send + 'static;

    async fn handle(
        &self,
        message: &M,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<Self::Response, HandlerError>;
}

/// Synchronous request/response handler. Registrations derive the async
/// invocation form as well, so blocking handlers also participate in async
/// dispatch.
pub trait BlockingRequestHandler<M: Message>: Send + Sync + 'static {
    type Response: Send + 'static;

    fn handle(
        &self,
        message: &M,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<Self::Response, HandlerError>;
}

/// Typed outcome of a cascading handler: the primary response plus the
/// secondary messages to publish once the response is finalized.
pub struct Outcome<R> {
    pub response: R,
    pub cascades: Vec<ErasedMessage>,
}

impl<R> Outcome<R> {
    /// Outcome with no cascades.
    pub fn of(response: R) -> Self {
        Self {
            response,
            cascades: Vec::new(),
        }
    }

    /// Append a cascading message.
    pub fn cascade(mut self, message: impl Message) -> Self {
        self.cascades.push(Arc::new(message));
        self
    }

    /// Append a cascading message only when present.
    pub fn cascade_opt(mut self, message: Option<impl Message>) -> Self {
        if let Some(message) = message {
            self.cascades.push(Arc::new(message));
        }
        self
    }
}

/// Handler whose response carries cascading messages. Cascading requires
/// awaiting a publish fan-out, so these handlers are async-only.
#[async_trait]
pub trait CascadingHandler<M: Message>: Send + Sync + 'static {
    type Response: Send + 'static;

    async fn handle(
        &self,
        message: &M,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Self::Response>, HandlerError>;
}

/// Fan-out target for `publish`. Any number may be registered per message
/// type, including zero.
#[async_trait]
pub trait NotificationHandler<M: Message>: Send + Sync + 'static {
    async fn handle(
        &self,
        message: &M,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Fan-out sequencing; lower runs first, unset sorts last.
    fn order(&self) -> Option<i32> {
        None
    }
}

/// Synchronous fan-out target.
pub trait BlockingNotificationHandler<M: Message>: Send + Sync + 'static {
    fn handle(
        &self,
        message: &M,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    fn order(&self) -> Option<i32> {
        None
    }
}

/// Fan-out target registered under a family or catch-all key, receiving the
/// message in erased form.
#[async_trait]
pub trait ErasedNotificationHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        message: &dyn Message,
        ctx: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn order(&self) -> Option<i32> {
        None
    }
}

pub(crate) fn downcast_message<M: Message>(
    message: &ErasedMessage,
) -> Result<&M, HandlerError> {
    message.as_any().downcast_ref::<M>().ok_or_else(|| {
        HandlerError::from(format!(
            "message routed as '{}' could not be downcast to {}",
            message.message_key(),
            std::any::type_name::<M>()
        ))
    })
}

fn resolve_service<H: Send + Sync + 'static>(
    ctx: &DispatchContext,
    key: &str,
) -> Result<Arc<H>, HandlerError> {
    ctx.resolver()
        .resolve(key)
        .and_then(|service| service.downcast::<H>().ok())
        .ok_or_else(|| {
            HandlerError::from(format!(
                "handler '{key}' is not registered with the service resolver"
            ))
        })
}

fn resolve_or_construct<H: Default + Send + Sync + 'static>(
    ctx: &DispatchContext,
    key: &str,
) -> Result<Arc<H>, HandlerError> {
    let service = ctx
        .resolver()
        .resolve_or_create(key, &(|| Arc::new(H::default()) as SharedService));
    service.downcast::<H>().ok().ok_or_else(|| {
        HandlerError::from(format!("service '{key}' resolved to an unexpected type"))
    })
}

pub(crate) fn erase_request_handler<M, H>(handler: Arc<H>) -> (AsyncInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: RequestHandler<M>,
{
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            let response = handler.handle(typed, &ctx, &cancel).await?;
            Ok(DispatchOutcome::response(response))
        })
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel).await?;
            Ok(())
        })
    });
    (invoke, publish)
}

pub(crate) fn erase_blocking_request_handler<M, H>(
    handler: Arc<H>,
) -> (AsyncInvokeFn, BlockingInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: BlockingRequestHandler<M>,
{
    let blocking_handler = Arc::clone(&handler);
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            let response = handler.handle(typed, &ctx, &cancel)?;
            Ok(DispatchOutcome::response(response))
        })
    });
    let invoke_blocking: BlockingInvokeFn = Arc::new(move |ctx, message, cancel| {
        let typed = downcast_message::<M>(&message)?;
        let response = blocking_handler.handle(typed, &ctx, &cancel)?;
        Ok(DispatchOutcome::response(response))
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel)?;
            Ok(())
        })
    });
    (invoke, invoke_blocking, publish)
}

pub(crate) fn erase_cascading_handler<M, H>(handler: Arc<H>) -> (AsyncInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: CascadingHandler<M>,
{
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let outcome = {
                let typed = downcast_message::<M>(&message)?;
                handler.handle(typed, &ctx, &cancel).await?
            };
            Ok(DispatchOutcome::with_cascades(
                outcome.response,
                outcome.cascades,
            ))
        })
    });
    // The fan-out form discards the response but preserves cascading side
    // effects, publishing them through the caller's context.
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move {
            let outcome = {
                let typed = downcast_message::<M>(&message)?;
                handler.handle(typed, &ctx, &cancel).await?
            };
            for cascade in outcome.cascades {
                ctx.publish_erased(cascade, cancel.clone())
                    .await
                    .map_err(|error| Box::new(error) as HandlerError)?;
            }
            Ok(())
        })
    });
    (invoke, publish)
}

pub(crate) fn erase_notification_handler<M, H>(handler: Arc<H>) -> (AsyncInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: NotificationHandler<M>,
{
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel).await?;
            Ok(DispatchOutcome::unit())
        })
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel).await
        })
    });
    (invoke, publish)
}

pub(crate) fn erase_blocking_notification_handler<M, H>(
    handler: Arc<H>,
) -> (AsyncInvokeFn, BlockingInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: BlockingNotificationHandler<M>,
{
    let blocking_handler = Arc::clone(&handler);
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel)?;
            Ok(DispatchOutcome::unit())
        })
    });
    let invoke_blocking: BlockingInvokeFn = Arc::new(move |ctx, message, cancel| {
        let typed = downcast_message::<M>(&message)?;
        blocking_handler.handle(typed, &ctx, &cancel)?;
        Ok(DispatchOutcome::unit())
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move {
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel)
        })
    });
    (invoke, invoke_blocking, publish)
}

pub(crate) fn erase_erased_notification_handler(
    handler: Arc<dyn ErasedNotificationHandler>,
) -> (AsyncInvokeFn, AsyncPublishFn) {
    let publish_handler = Arc::clone(&handler);
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            handler.handle(message.as_ref(), &ctx, &cancel).await?;
            Ok(DispatchOutcome::unit())
        })
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let handler = Arc::clone(&publish_handler);
        Box::pin(async move { handler.handle(message.as_ref(), &ctx, &cancel).await })
    });
    (invoke, publish)
}

pub(crate) fn erase_resolved_request_handler<M, H>(
    service_key: String,
) -> (AsyncInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: RequestHandler<M>,
{
    let publish_key = service_key.clone();
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let key = service_key.clone();
        Box::pin(async move {
            let handler = resolve_service::<H>(&ctx, &key)?;
            let typed = downcast_message::<M>(&message)?;
            let response = handler.handle(typed, &ctx, &cancel).await?;
            Ok(DispatchOutcome::response(response))
        })
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let key = publish_key.clone();
        Box::pin(async move {
            let handler = resolve_service::<H>(&ctx, &key)?;
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel).await?;
            Ok(())
        })
    });
    (invoke, publish)
}

pub(crate) fn erase_resolved_or_default_request_handler<M, H>(
    service_key: String,
) -> (AsyncInvokeFn, AsyncPublishFn)
where
    M: Message,
    H: RequestHandler<M> + Default,
{
    let publish_key = service_key.clone();
    let invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
        let key = service_key.clone();
        Box::pin(async move {
            let handler = resolve_or_construct::<H>(&ctx, &key)?;
            let typed = downcast_message::<M>(&message)?;
            let response = handler.handle(typed, &ctx, &cancel).await?;
            Ok(DispatchOutcome::response(response))
        })
    });
    let publish: AsyncPublishFn = Arc::new(move |ctx, message, cancel| {
        let key = publish_key.clone();
        Box::pin(async move {
            let handler = resolve_or_construct::<H>(&ctx, &key)?;
            let typed = downcast_message::<M>(&message)?;
            handler.handle(typed, &ctx, &cancel).await?;
            Ok(())
        })
    });
    (invoke, publish)
}
