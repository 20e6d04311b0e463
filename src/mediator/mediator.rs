//! The mediator façade, its builder, and the cached dispatch plans.

use std::any::TypeId;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MediatorConfig;
use crate::error::{DispatchError, PublishFailure, Result};
use crate::handler::{
    erase_blocking_notification_handler, erase_blocking_request_handler, erase_cascading_handler,
    erase_erased_notification_handler, erase_notification_handler, erase_request_handler,
    erase_resolved_or_default_request_handler, erase_resolved_request_handler,
    BlockingNotificationHandler, BlockingRequestHandler, CascadingHandler,
    ErasedNotificationHandler, NotificationHandler, RequestHandler,
};
use crate::message::{ErasedMessage, Message, MessageKey};
use crate::pipeline::{Middleware, MiddlewarePipeline};
use crate::publisher::{
    into_publish_result, NotificationPublisher, PublishTarget,
};
use crate::registry::{
    AsyncInvokeFn, DispatchOutcome, HandlerId, HandlerRegistration, HandlerRegistry, RegistryStats,
};
use crate::resolver::{ServiceResolver, SimpleServiceResolver};

use super::context::DispatchContext;

/// Cached resolution for one `invoke` key: the single registration and the
/// middleware pipeline assembled for the message key.
struct InvokePlan {
    registration: HandlerRegistration,
    pipeline: MiddlewarePipeline,
}

/// One fan-out target inside a cached publish plan.
struct PublishPlanEntry {
    registration: HandlerRegistration,
    /// The registration's publish delegate adapted to the pipeline's
    /// invocation shape (unit outcome, no response allocation).
    publish_invoke: AsyncInvokeFn,
    pipeline: MiddlewarePipeline,
}

struct PublishPlan {
    targets: Vec<PublishPlanEntry>,
}

struct MediatorInner {
    registry: HandlerRegistry,
    middleware: Vec<Arc<dyn Middleware>>,
    publisher: Arc<dyn NotificationPublisher>,
    resolver: Arc<dyn ServiceResolver>,
    invoke_plans: DashMap<(MessageKey, TypeId), Arc<InvokePlan>>,
    publish_plans: DashMap<MessageKey, Arc<PublishPlan>>,
    built_at: DateTime<Utc>,
}

/// In-process message dispatcher.
///
/// Cheap to clone; all clones share the registry, plan caches, and
/// configured strategy.
///
/// ```rust
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use mediator_core::{
///     impl_message, CancellationToken, DispatchContext, HandlerError, Mediator, RequestHandler,
/// };
///
/// struct Ping(String);
/// impl_message!(Ping);
///
/// struct PingHandler;
///
/// #[async_trait]
/// impl RequestHandler<Ping> for PingHandler {
///     type Response = String;
///
///     async fn handle(
///         &self,
///         message: &Ping,
///         _ctx: &DispatchContext,
///         _cancel: &CancellationToken,
///     ) -> Result<String, HandlerError> {
///         Ok(format!("{} Pong", message.0))
///     }
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mediator = Mediator::builder()
///     .register::<Ping, _>(Arc::new(PingHandler))
///     .build();
///
/// let reply: String = mediator
///     .invoke(Ping("hi".to_string()), CancellationToken::new())
///     .await?;
/// assert_eq!(reply, "hi Pong");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<MediatorInner>,
}

impl Mediator {
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::new()
    }

    /// Dispatch to exactly one handler and return its response. Use
    /// `R = ()` for void requests. Fails fast with `NoHandlerFound` or
    /// `AmbiguousHandler` before any handler runs.
    pub async fn invoke<M, R>(&self, message: M, cancel: CancellationToken) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let ctx = DispatchContext::root(self.clone());
        let result = Self::invoke_in(&ctx, message, cancel).await;
        ctx.scope().release().await;
        result
    }

    /// Fan a message out to every applicable handler (polymorphic lookup).
    /// Zero registered handlers is a valid no-op.
    pub async fn publish<M: Message>(&self, message: M, cancel: CancellationToken) -> Result<()> {
        let ctx = DispatchContext::root(self.clone());
        let result = Self::publish_in(&ctx, Arc::new(message), cancel).await;
        ctx.scope().release().await;
        result
    }

    /// Blocking `invoke`. Valid only when the resolved handler has a
    /// blocking invocation form, emits no cascades, and every applicable
    /// middleware supports the blocking path.
    pub fn invoke_blocking<M, R>(&self, message: M, cancel: CancellationToken) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let ctx = DispatchContext::root(self.clone());
        let result = Self::invoke_blocking_in(&ctx, message, cancel);
        ctx.scope().release_blocking();
        result
    }

    /// Blocking `publish`. Valid only when every applicable handler and
    /// middleware is fully synchronous; always runs sequentially in
    /// registration order.
    pub fn publish_blocking<M: Message>(&self, message: M, cancel: CancellationToken) -> Result<()> {
        let ctx = DispatchContext::root(self.clone());
        let result = Self::publish_blocking_in(&ctx, Arc::new(message), cancel);
        ctx.scope().release_blocking();
        result
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }

    pub fn stats(&self) -> MediatorStats {
        MediatorStats {
            registered_handlers: self.inner.registry.len(),
            middleware_count: self.inner.middleware.len(),
            invoke_plans_cached: self.inner.invoke_plans.len(),
            publish_plans_cached: self.inner.publish_plans.len(),
            publish_strategy: self.inner.publisher.name(),
            built_at: self.inner.built_at,
        }
    }

    pub(crate) fn resolver(&self) -> &Arc<dyn ServiceResolver> {
        &self.inner.resolver
    }

    /// Resolve (or fetch the cached) invoke plan for a message key.
    fn invoke_plan<R: 'static>(&self, key: &MessageKey) -> Result<Arc<InvokePlan>> {
        let plan_key = (key.clone(), TypeId::of::<R>());
        if let Some(plan) = self.inner.invoke_plans.get(&plan_key) {
            return Ok(Arc::clone(plan.value()));
        }

        let registrations = self.inner.registry.lookup_invoke(key);
        match registrations.len() {
            0 => Err(DispatchError::NoHandlerFound {
                message_key: key.clone(),
            }),
            1 => {
                let plan = Arc::new(InvokePlan {
                    registration: registrations[0].clone(),
                    pipeline: MiddlewarePipeline::assemble(&self.inner.middleware, key),
                });
                // Insert-if-absent keeps whichever plan a concurrent first
                // population won with; entries are immutable afterwards.
                Ok(Arc::clone(
                    self.inner.invoke_plans.entry(plan_key).or_insert(plan).value(),
                ))
            }
            count => Err(DispatchError::AmbiguousHandler {
                message_key: key.clone(),
                count,
            }),
        }
    }

    /// Resolve (or fetch the cached) publish plan for a message's concrete
    /// key, spanning family keys and the catch-all.
    fn publish_plan(&self, message: &ErasedMessage) -> Arc<PublishPlan> {
        let key = message.message_key();
        if let Some(plan) = self.inner.publish_plans.get(&key) {
            return Arc::clone(plan.value());
        }

        let mut keys = Vec::with_capacity(message.family_keys().len() + 2);
        keys.push(key.clone());
        keys.extend(message.family_keys());
        keys.push(MessageKey::catch_all());

        let targets = self
            .inner
            .registry
            .lookup_publish(&keys)
            .into_iter()
            .map(|registration| {
                let publish = Arc::clone(&registration.publish);
                let publish_invoke: AsyncInvokeFn = Arc::new(move |ctx, message, cancel| {
                    let in_flight = (publish.as_ref())(ctx, message, cancel);
                    Box::pin(async move {
                        in_flight.await?;
                        Ok(DispatchOutcome::unit())
                    })
                });
                PublishPlanEntry {
                    pipeline: MiddlewarePipeline::assemble(&self.inner.middleware, &key),
                    publish_invoke,
                    registration,
                }
            })
            .collect();

        let plan = Arc::new(PublishPlan { targets });
        Arc::clone(self.inner.publish_plans.entry(key).or_insert(plan).value())
    }

    pub(crate) async fn invoke_in<M, R>(
        ctx: &DispatchContext,
        message: M,
        cancel: CancellationToken,
    ) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let key = MessageKey::of::<M>();
        let mediator = ctx.mediator();
        let plan = mediator.invoke_plan::<R>(&key)?;

        debug!(
            correlation_id = %ctx.correlation_id(),
            message_key = %key,
            handler = %plan.registration.handler_id,
            depth = ctx.depth(),
            "invoking handler"
        );

        let erased: ErasedMessage = Arc::new(message);
        let outcome = plan
            .pipeline
            .execute(ctx, &erased, &cancel, &plan.registration.invoke)
            .await
            .map_err(|source| DispatchError::HandlerFailed {
                message_key: key.clone(),
                handler: plan.registration.handler_id.to_string(),
                source,
            })?;

        let DispatchOutcome { response, cascades } = outcome;
        let response = response.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
            DispatchError::ResponseTypeMismatch {
                message_key: key.clone(),
                expected: std::any::type_name::<R>(),
            }
        })?;

        // The primary result is final; cascades publish sequentially through
        // the same context and scope. A cascade failure is attributed to the
        // cascade, never to the already-successful primary handler.
        for cascade in cascades {
            let cascade_key = cascade.message_key();
            debug!(
                correlation_id = %ctx.correlation_id(),
                message_key = %key,
                cascade_key = %cascade_key,
                "publishing cascaded message"
            );
            if let Err(source) = ctx.publish_erased(cascade, cancel.clone()).await {
                return Err(DispatchError::CascadeFailed {
                    message_key: key,
                    cascade_key,
                    source: Box::new(source),
                });
            }
        }

        Ok(response)
    }

    pub(crate) async fn publish_in(
        ctx: &DispatchContext,
        message: ErasedMessage,
        cancel: CancellationToken,
    ) -> Result<()> {
        let key = message.message_key();
        let mediator = ctx.mediator();
        let plan = mediator.publish_plan(&message);

        if plan.targets.is_empty() {
            debug!(
                correlation_id = %ctx.correlation_id(),
                message_key = %key,
                "no handlers registered; publish is a no-op"
            );
            return Ok(());
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            message_key = %key,
            handlers = plan.targets.len(),
            strategy = mediator.inner.publisher.name(),
            depth = ctx.depth(),
            "publishing message"
        );

        let targets: Vec<PublishTarget> = plan
            .targets
            .iter()
            .map(|entry| {
                // Each target retains the scope for its own lifetime so
                // detached (fire-and-forget) handlers never observe a
                // disposed scope.
                let ctx = ctx.nested();
                let message = Arc::clone(&message);
                let cancel = cancel.clone();
                let pipeline = entry.pipeline.clone();
                let invoke = Arc::clone(&entry.publish_invoke);
                PublishTarget::new(entry.registration.handler_id.clone(), move || {
                    Box::pin(async move {
                        let result = pipeline
                            .execute(&ctx, &message, &cancel, &invoke)
                            .await
                            .map(|_| ());
                        ctx.scope().release().await;
                        result
                    })
                })
            })
            .collect();

        mediator
            .inner
            .publisher
            .publish_all(&key, targets, &cancel)
            .await
    }

    pub(crate) fn invoke_blocking_in<M, R>(
        ctx: &DispatchContext,
        message: M,
        cancel: CancellationToken,
    ) -> Result<R>
    where
        M: Message,
        R: Send + 'static,
    {
        let key = MessageKey::of::<M>();
        let mediator = ctx.mediator();
        let plan = mediator.invoke_plan::<R>(&key)?;
        let registration = &plan.registration;

        if registration.cascading {
            return Err(DispatchError::SyncInvokeOnCascadingHandler { message_key: key });
        }
        let Some(blocking) = registration.invoke_blocking.as_ref() else {
            return Err(DispatchError::SyncOnAsyncHandler {
                message_key: key,
                reason: format!("handler '{}' is async-only", registration.handler_id),
            });
        };
        if let Some(name) = plan.pipeline.first_async_entry() {
            return Err(DispatchError::SyncOnAsyncHandler {
                message_key: key,
                reason: format!("middleware '{name}' has no blocking phases"),
            });
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            message_key = %key,
            handler = %registration.handler_id,
            "invoking handler (blocking)"
        );

        let erased: ErasedMessage = Arc::new(message);
        let outcome = plan
            .pipeline
            .execute_blocking(ctx, &erased, &cancel, blocking)
            .map_err(|source| DispatchError::HandlerFailed {
                message_key: key.clone(),
                handler: registration.handler_id.to_string(),
                source,
            })?;

        // A blocking delegate cannot await a cascade fan-out.
        if outcome.has_cascades() {
            return Err(DispatchError::SyncInvokeOnCascadingHandler { message_key: key });
        }

        outcome.response.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
            DispatchError::ResponseTypeMismatch {
                message_key: key,
                expected: std::any::type_name::<R>(),
            }
        })
    }

    pub(crate) fn publish_blocking_in(
        ctx: &DispatchContext,
        message: ErasedMessage,
        cancel: CancellationToken,
    ) -> Result<()> {
        let key = message.message_key();
        let mediator = ctx.mediator();
        let plan = mediator.publish_plan(&message);

        if plan.targets.is_empty() {
            return Ok(());
        }

        // Fail fast before any handler runs.
        for entry in &plan.targets {
            if entry.registration.cascading {
                return Err(DispatchError::SyncInvokeOnCascadingHandler {
                    message_key: key.clone(),
                });
            }
            if entry.registration.invoke_blocking.is_none() {
                return Err(DispatchError::SyncOnAsyncHandler {
                    message_key: key.clone(),
                    reason: format!(
                        "handler '{}' is async-only",
                        entry.registration.handler_id
                    ),
                });
            }
            if let Some(name) = entry.pipeline.first_async_entry() {
                return Err(DispatchError::SyncOnAsyncHandler {
                    message_key: key.clone(),
                    reason: format!("middleware '{name}' has no blocking phases"),
                });
            }
        }

        let total = plan.targets.len();
        let mut failures = Vec::new();
        for entry in &plan.targets {
            let Some(blocking) = entry.registration.invoke_blocking.as_ref() else {
                continue;
            };
            if let Err(error) = entry
                .pipeline
                .execute_blocking(ctx, &message, &cancel, blocking)
            {
                failures.push(PublishFailure {
                    handler: entry.registration.handler_id.to_string(),
                    error,
                });
            }
        }

        into_publish_result(&key, total, failures)
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("registry", &self.inner.registry)
            .field("middleware", &self.inner.middleware.len())
            .field("publish_strategy", &self.inner.publisher.name())
            .finish()
    }
}

/// Point-in-time view of the mediator's registrations and plan caches.
#[derive(Debug, Clone)]
pub struct MediatorStats {
    pub registered_handlers: usize,
    pub middleware_count: usize,
    pub invoke_plans_cached: usize,
    pub publish_plans_cached: usize,
    pub publish_strategy: &'static str,
    pub built_at: DateTime<Utc>,
}

/// Collects handler registrations, middleware, the publish strategy, and
/// the service resolver, then builds an immutable [`Mediator`].
pub struct MediatorBuilder {
    registry: HandlerRegistry,
    middleware: Vec<Arc<dyn Middleware>>,
    resolver: Arc<dyn ServiceResolver>,
    config: MediatorConfig,
}

impl MediatorBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            middleware: Vec::new(),
            resolver: Arc::new(SimpleServiceResolver::new()),
            config: MediatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ServiceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    fn add(mut self, registration: HandlerRegistration) -> Self {
        self.registry.register(registration);
        self
    }

    /// Register an async request/response handler.
    pub fn register<M, H>(self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: RequestHandler<M>,
    {
        let (invoke, publish) = erase_request_handler::<M, H>(handler);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id: HandlerId::of::<H>("handle"),
            invoke,
            invoke_blocking: None,
            publish,
            order: None,
            is_async: true,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Register a synchronous request/response handler; it participates in
    /// both dispatch paths.
    pub fn register_blocking<M, H>(self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: BlockingRequestHandler<M>,
    {
        let (invoke, invoke_blocking, publish) = erase_blocking_request_handler::<M, H>(handler);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id: HandlerId::of::<H>("handle"),
            invoke,
            invoke_blocking: Some(invoke_blocking),
            publish,
            order: None,
            is_async: false,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Register a cascading handler (async-only dispatch).
    pub fn register_cascading<M, H>(self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: CascadingHandler<M>,
    {
        let (invoke, publish) = erase_cascading_handler::<M, H>(handler);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id: HandlerId::of::<H>("handle"),
            invoke,
            invoke_blocking: None,
            publish,
            order: None,
            is_async: true,
            cascading: true,
            registered_at: Utc::now(),
        })
    }

    /// Register an async notification (fan-out) handler.
    pub fn register_notification<M, H>(self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: NotificationHandler<M>,
    {
        let order = handler.order();
        let (invoke, publish) = erase_notification_handler::<M, H>(handler);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id: HandlerId::of::<H>("handle"),
            invoke,
            invoke_blocking: None,
            publish,
            order,
            is_async: true,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Register a synchronous notification handler.
    pub fn register_notification_blocking<M, H>(self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: BlockingNotificationHandler<M>,
    {
        let order = handler.order();
        let (invoke, invoke_blocking, publish) =
            erase_blocking_notification_handler::<M, H>(handler);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id: HandlerId::of::<H>("handle"),
            invoke,
            invoke_blocking: Some(invoke_blocking),
            publish,
            order,
            is_async: false,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Register an erased notification handler under an explicit key: a
    /// family key for interface/base-type fan-out, or the catch-all key.
    pub fn register_notification_for(
        self,
        key: MessageKey,
        handler: Arc<dyn ErasedNotificationHandler>,
    ) -> Self {
        let order = handler.order();
        let handler_id = HandlerId::named(handler.name().to_string(), "handle");
        let (invoke, publish) = erase_erased_notification_handler(handler);
        self.add(HandlerRegistration {
            message_key: key,
            handler_id,
            invoke,
            invoke_blocking: None,
            publish,
            order,
            is_async: true,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Register a request handler resolved through the service resolver on
    /// every invocation (non-singleton lifetimes).
    pub fn register_resolved<M, H>(self, service_key: impl Into<String>) -> Self
    where
        M: Message,
        H: RequestHandler<M>,
    {
        let service_key = service_key.into();
        let handler_id = HandlerId::named(service_key.clone(), "handle");
        let (invoke, publish) = erase_resolved_request_handler::<M, H>(service_key);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id,
            invoke,
            invoke_blocking: None,
            publish,
            order: None,
            is_async: true,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Like [`register_resolved`](Self::register_resolved), but falls back
    /// to `H::default()` when the resolver has no registration; the
    /// constructed instance is cached by the resolver as a singleton.
    pub fn register_resolved_or_default<M, H>(self, service_key: impl Into<String>) -> Self
    where
        M: Message,
        H: RequestHandler<M> + Default,
    {
        let service_key = service_key.into();
        let handler_id = HandlerId::named(service_key.clone(), "handle");
        let (invoke, publish) = erase_resolved_or_default_request_handler::<M, H>(service_key);
        self.add(HandlerRegistration {
            message_key: MessageKey::of::<M>(),
            handler_id,
            invoke,
            invoke_blocking: None,
            publish,
            order: None,
            is_async: true,
            cascading: false,
            registered_at: Utc::now(),
        })
    }

    /// Add a middleware entry. Registration order is the tiebreaker among
    /// equal explicit orders and specificity tiers.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Build the immutable mediator, running blocking-path validation when
    /// configured.
    pub fn build(self) -> Mediator {
        if self.config.validate_on_build {
            self.validate_blocking_paths();
        }

        let publisher = crate::publisher::for_kind(self.config.publish_strategy);
        info!(
            handlers = self.registry.len(),
            middleware = self.middleware.len(),
            strategy = publisher.name(),
            "mediator built"
        );

        Mediator {
            inner: Arc::new(MediatorInner {
                registry: self.registry,
                middleware: self.middleware,
                publisher,
                resolver: self.resolver,
                invoke_plans: DashMap::new(),
                publish_plans: DashMap::new(),
                built_at: Utc::now(),
            }),
        }
    }

    /// Build-time half of the asynchrony rule: flag blocking-capable
    /// registrations whose middleware chain can never run synchronously.
    /// Runtime enforcement in the blocking dispatch paths remains
    /// authoritative.
    fn validate_blocking_paths(&self) {
        for (key, registrations) in self.registry.iter() {
            let pipeline = MiddlewarePipeline::assemble(&self.middleware, key);
            let Some(async_middleware) = pipeline.first_async_entry() else {
                continue;
            };
            for registration in registrations
                .iter()
                .filter(|registration| registration.invoke_blocking.is_some())
            {
                warn!(
                    message_key = %key,
                    handler = %registration.handler_id,
                    middleware = async_middleware,
                    "blocking-capable handler cannot be dispatched on the blocking path; middleware has async-only phases"
                );
            }
        }
    }
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublishStrategyKind;

    #[test]
    fn builder_defaults_to_sequential_strategy() {
        let mediator = Mediator::builder().build();
        let stats = mediator.stats();
        assert_eq!(stats.registered_handlers, 0);
        assert_eq!(stats.publish_strategy, "sequential");
        assert_eq!(stats.invoke_plans_cached, 0);
    }

    #[test]
    fn builder_honors_configured_strategy() {
        let config = MediatorConfig {
            publish_strategy: PublishStrategyKind::ConcurrentWaitAll,
            ..MediatorConfig::default()
        };
        let mediator = Mediator::builder().with_config(config).build();
        assert_eq!(mediator.stats().publish_strategy, "concurrent-wait-all");
    }
}
