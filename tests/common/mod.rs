//! Shared fixtures for the integration suites: messages, handlers,
//! middleware, and a dispose-counting resolver.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use mediator_core::{
    impl_message, BlockingRequestHandler, CancellationToken, DispatchContext, HandlerError,
    Middleware, NotificationHandler, PipelineControl, PipelineState, RequestHandler,
    ServiceResolver, ServiceScope, SharedService, SimpleServiceResolver, SimpleServiceScope,
};

pub struct Ping(pub String);
impl_message!(Ping);

/// Simple request/response handler: `Ping("hi")` -> `"hi Pong"`.
pub struct PingHandler;

#[async_trait]
impl RequestHandler<Ping> for PingHandler {
    type Response = String;

    async fn handle(
        &self,
        message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<String, HandlerError> {
        Ok(format!("{} Pong", message.0))
    }
}

/// Blocking request/response handler: `Ping("hi")` -> `"hi Echo"`.
pub struct EchoBlockingHandler;

impl BlockingRequestHandler<Ping> for EchoBlockingHandler {
    type Response = String;

    fn handle(
        &self,
        message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<String, HandlerError> {
        Ok(format!("{} Echo", message.0))
    }
}

/// Notification handler counting how often it ran.
pub struct CountingPingNotification {
    pub count: Arc<AtomicUsize>,
}

#[async_trait]
impl NotificationHandler<Ping> for CountingPingNotification {
    async fn handle(
        &self,
        _message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Middleware recording every phase it runs into a shared log.
pub struct RecordingMiddleware {
    pub label: &'static str,
    pub order: i32,
    pub log: CallLog,
}

impl RecordingMiddleware {
    pub fn new(label: &'static str, order: i32, log: CallLog) -> Arc<Self> {
        Arc::new(Self { label, order, log })
    }

    fn record(&self, phase: &str) {
        self.log.lock().push(format!("{}:{}", self.label, phase));
    }
}

#[async_trait]
impl Middleware for RecordingMiddleware {
    fn name(&self) -> &str {
        self.label
    }

    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.record("before");
        Ok(PipelineControl::Next)
    }

    async fn after(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _response: &(dyn std::any::Any + Send),
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.record("after");
        Ok(())
    }

    async fn finally(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _response: Option<&(dyn std::any::Any + Send)>,
        _error: Option<&(dyn std::error::Error + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        self.record("finally");
        Ok(())
    }
}

/// Middleware with fully synchronous phases, usable on both dispatch paths.
pub struct BlockingRecordingMiddleware {
    pub label: &'static str,
    pub order: i32,
    pub log: CallLog,
}

impl BlockingRecordingMiddleware {
    pub fn new(label: &'static str, order: i32, log: CallLog) -> Arc<Self> {
        Arc::new(Self { label, order, log })
    }

    fn record(&self, phase: &str) {
        self.log.lock().push(format!("{}:{}", self.label, phase));
    }
}

#[async_trait]
impl Middleware for BlockingRecordingMiddleware {
    fn name(&self) -> &str {
        self.label
    }

    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn supports_blocking(&self) -> bool {
        true
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.record("before");
        Ok(PipelineControl::Next)
    }

    fn before_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.record("before_blocking");
        Ok(PipelineControl::Next)
    }

    fn after_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _response: &(dyn std::any::Any + Send),
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.record("after_blocking");
        Ok(())
    }

    fn finally_blocking(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn mediator_core::Message,
        _response: Option<&(dyn std::any::Any + Send)>,
        _error: Option<&(dyn std::error::Error + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        self.record("finally_blocking");
        Ok(())
    }
}

/// Resolver that counts created scopes and disposals, for verifying the
/// one-scope-per-call-chain contract.
pub struct DisposeCountingResolver {
    inner: SimpleServiceResolver,
    pub scopes_created: Arc<AtomicUsize>,
    pub disposals: Arc<AtomicUsize>,
}

impl DisposeCountingResolver {
    pub fn new() -> Self {
        Self {
            inner: SimpleServiceResolver::new(),
            scopes_created: Arc::new(AtomicUsize::new(0)),
            disposals: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ServiceResolver for DisposeCountingResolver {
    fn resolve(&self, key: &str) -> Option<SharedService> {
        self.inner.resolve(key)
    }

    fn resolve_or_create(
        &self,
        key: &str,
        construct: &(dyn Fn() -> SharedService + Send + Sync),
    ) -> SharedService {
        self.inner.resolve_or_create(key, construct)
    }

    fn create_scope(&self) -> Arc<dyn ServiceScope> {
        self.scopes_created.fetch_add(1, Ordering::SeqCst);
        let scope = SimpleServiceScope::new();
        let disposals = Arc::clone(&self.disposals);
        scope.on_dispose(move || {
            disposals.fetch_add(1, Ordering::SeqCst);
        });
        Arc::new(scope)
    }
}
