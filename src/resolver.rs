//! # Service Resolver Boundary
//!
//! The mediator never depends on a concrete dependency-injection container.
//! Handler and middleware instances reach the pipeline through the
//! [`ServiceResolver`] trait: either captured as shared singletons at
//! registration time, or re-resolved through the resolver on every
//! invocation for per-dispatch lifetimes.
//!
//! [`SimpleServiceResolver`] is the in-crate default: a keyed service map
//! with singleton-by-default caching of constructed instances and plain
//! disposable scopes.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::HandlerError;
use crate::mediator::DispatchContext;
use crate::message::{Message, MessageKey};
use crate::pipeline::{Middleware, MiddlewareScope, PipelineControl, PipelineState};
use crate::scope::ServiceScope;

/// A resolved service instance, erased for keyed storage.
pub type SharedService = Arc<dyn Any + Send + Sync>;

/// External dependency-injection boundary.
pub trait ServiceResolver: Send + Sync + 'static {
    /// Resolve a registered service by key.
    fn resolve(&self, key: &str) -> Option<SharedService>;

    /// Resolve a service, falling back to direct construction when no
    /// registration exists. Constructed instances are cached and reused as
    /// singletons by default.
    fn resolve_or_create(
        &self,
        key: &str,
        construct: &(dyn Fn() -> SharedService + Send + Sync),
    ) -> SharedService;

    /// Open a new disposable resource scope for one logical call chain.
    fn create_scope(&self) -> Arc<dyn ServiceScope>;
}

impl<R> ServiceResolver for Arc<R>
where
    R: ServiceResolver + ?Sized,
{
    fn resolve(&self, key: &str) -> Option<SharedService> {
        (**self).resolve(key)
    }

    fn resolve_or_create(
        &self,
        key: &str,
        construct: &(dyn Fn() -> SharedService + Send + Sync),
    ) -> SharedService {
        (**self).resolve_or_create(key, construct)
    }

    fn create_scope(&self) -> Arc<dyn ServiceScope> {
        (**self).create_scope()
    }
}

/// Default in-process resolver backed by concurrent keyed maps.
#[derive(Default)]
pub struct SimpleServiceResolver {
    services: DashMap<String, SharedService>,
    constructed: DashMap<String, SharedService>,
}

impl SimpleServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service instance under a key.
    pub fn register<T: Send + Sync + 'static>(&self, key: impl Into<String>, service: Arc<T>) {
        let key = key.into();
        debug!(service_key = %key, "registered service");
        self.services.insert(key, service as SharedService);
    }

    /// Resolve and downcast a service to its concrete type.
    pub fn resolve_typed<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.resolve(key)
            .and_then(|service| service.downcast::<T>().ok())
    }
}

impl ServiceResolver for SimpleServiceResolver {
    fn resolve(&self, key: &str) -> Option<SharedService> {
        self.services
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .or_else(|| {
                self.constructed
                    .get(key)
                    .map(|entry| Arc::clone(entry.value()))
            })
    }

    fn resolve_or_create(
        &self,
        key: &str,
        construct: &(dyn Fn() -> SharedService + Send + Sync),
    ) -> SharedService {
        if let Some(existing) = self.resolve(key) {
            return existing;
        }
        Arc::clone(
            self.constructed
                .entry(key.to_string())
                .or_insert_with(construct)
                .value(),
        )
    }

    fn create_scope(&self) -> Arc<dyn ServiceScope> {
        Arc::new(SimpleServiceScope::new())
    }
}

impl std::fmt::Debug for SimpleServiceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleServiceResolver")
            .field("services", &self.services.len())
            .field("constructed", &self.constructed.len())
            .finish()
    }
}

/// Default resource scope: runs registered disposal callbacks exactly once.
#[derive(Default)]
pub struct SimpleServiceScope {
    disposables: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    disposed: AtomicBool,
}

impl SimpleServiceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback to run when this scope is disposed.
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) {
        self.disposables.lock().push(Box::new(callback));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ServiceScope for SimpleServiceScope {
    fn dispose_blocking(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.disposables.lock());
        for callback in callbacks {
            callback();
        }
    }
}

/// Middleware adapter that re-resolves its target through the service
/// resolver on every invocation, for middleware with non-singleton
/// lifetimes. Ordering and blocking-path metadata are declared up front
/// because plan assembly runs without a dispatch context.
pub struct ResolvedMiddleware<MW: Middleware> {
    service_key: String,
    order: Option<i32>,
    scope: MiddlewareScope,
    only_for: Option<MessageKey>,
    blocking: bool,
    _marker: PhantomData<fn() -> MW>,
}

impl<MW: Middleware> ResolvedMiddleware<MW> {
    pub fn new(service_key: impl Into<String>) -> Self {
        Self {
            service_key: service_key.into(),
            order: None,
            scope: MiddlewareScope::Global,
            only_for: None,
            blocking: false,
            _marker: PhantomData,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Restrict the adapter to a single message key.
    pub fn for_message_key(mut self, key: MessageKey) -> Self {
        self.scope = MiddlewareScope::Message;
        self.only_for = Some(key);
        self
    }

    pub fn with_scope(mut self, scope: MiddlewareScope) -> Self {
        self.scope = scope;
        self
    }

    /// Declare that the resolved middleware supports the blocking path.
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    fn current(&self, ctx: &DispatchContext) -> Result<Arc<MW>, HandlerError> {
        ctx.resolver()
            .resolve(&self.service_key)
            .and_then(|service| service.downcast::<MW>().ok())
            .ok_or_else(|| {
                HandlerError::from(format!(
                    "middleware '{}' is not registered with the service resolver",
                    self.service_key
                ))
            })
    }
}

#[async_trait]
impl<MW: Middleware> Middleware for ResolvedMiddleware<MW> {
    fn name(&self) -> &str {
        &self.service_key
    }

    fn order(&self) -> Option<i32> {
        self.order
    }

    fn scope(&self) -> MiddlewareScope {
        self.scope
    }

    fn applies_to(&self, key: &MessageKey) -> bool {
        match &self.only_for {
            Some(only) => only == key,
            None => true,
        }
    }

    fn supports_blocking(&self) -> bool {
        self.blocking
    }

    async fn before(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        state: &mut PipelineState,
        cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.current(ctx)?.before(ctx, message, state, cancel).await
    }

    async fn after(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        response: &(dyn Any + Send),
        state: &mut PipelineState,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.current(ctx)?
            .after(ctx, message, response, state, cancel)
            .await
    }

    async fn finally(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        response: Option<&(dyn Any + Send)>,
        error: Option<&(dyn std::error::Error + Send + Sync)>,
        state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        self.current(ctx)?
            .finally(ctx, message, response, error, state)
            .await
    }

    fn before_blocking(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        state: &mut PipelineState,
        cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.current(ctx)?.before_blocking(ctx, message, state, cancel)
    }

    fn after_blocking(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        response: &(dyn Any + Send),
        state: &mut PipelineState,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.current(ctx)?
            .after_blocking(ctx, message, response, state, cancel)
    }

    fn finally_blocking(
        &self,
        ctx: &DispatchContext,
        message: &dyn Message,
        response: Option<&(dyn Any + Send)>,
        error: Option<&(dyn std::error::Error + Send + Sync)>,
        state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        self.current(ctx)?
            .finally_blocking(ctx, message, response, error, state)
    }
}
