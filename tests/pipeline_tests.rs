//! Integration tests for middleware pipeline semantics: ordering,
//! short-circuiting, state passing, and finally-phase guarantees.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use common::{new_call_log, CallLog, Ping, PingHandler, RecordingMiddleware};
use mediator_core::{
    CancellationToken, DispatchContext, DispatchError, HandlerError, Mediator, Message,
    Middleware, PipelineControl, PipelineState, RequestHandler,
};

struct CountingPingHandler {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestHandler<Ping> for CountingPingHandler {
    type Response = String;

    async fn handle(
        &self,
        _message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<String, HandlerError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok("handled".to_string())
    }
}

struct FailingPingHandler;

#[async_trait]
impl RequestHandler<Ping> for FailingPingHandler {
    type Response = String;

    async fn handle(
        &self,
        _message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<String, HandlerError> {
        Err(anyhow::anyhow!("handler exploded").into())
    }
}

/// Short-circuits every pipeline it participates in.
struct ShortCircuitMiddleware {
    label: &'static str,
    order: i32,
    log: CallLog,
    substitute: &'static str,
}

#[async_trait]
impl Middleware for ShortCircuitMiddleware {
    fn name(&self) -> &str {
        self.label
    }

    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.log.lock().push(format!("{}:before", self.label));
        Ok(PipelineControl::ShortCircuit(Box::new(
            self.substitute.to_string(),
        )))
    }

    async fn after(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: &(dyn std::any::Any + Send),
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.log.lock().push(format!("{}:after", self.label));
        Ok(())
    }

    async fn finally(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: Option<&(dyn std::any::Any + Send)>,
        _error: Option<&(dyn std::error::Error + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        self.log.lock().push(format!("{}:finally", self.label));
        Ok(())
    }
}

#[tokio::test]
async fn before_runs_ascending_and_after_finally_descending() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .middleware(RecordingMiddleware::new("A", 1, Arc::clone(&log)))
        .middleware(RecordingMiddleware::new("B", 2, Arc::clone(&log)))
        .build();

    let _: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "A:before".to_string(),
            "B:before".to_string(),
            "B:after".to_string(),
            "A:after".to_string(),
            "B:finally".to_string(),
            "A:finally".to_string(),
        ]
    );
}

#[tokio::test]
async fn registration_order_breaks_ties_between_equal_orders() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .middleware(RecordingMiddleware::new("first", 1, Arc::clone(&log)))
        .middleware(RecordingMiddleware::new("second", 1, Arc::clone(&log)))
        .build();

    let _: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        log.lock()[..2],
        [
            "first:before".to_string(),
            "second:before".to_string()
        ]
    );
}

#[tokio::test]
async fn short_circuit_skips_handler_and_later_befores_but_not_after_finally() {
    let log = new_call_log();
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(CountingPingHandler {
            count: Arc::clone(&handler_calls),
        }))
        .middleware(Arc::new(ShortCircuitMiddleware {
            label: "A",
            order: 1,
            log: Arc::clone(&log),
            substitute: "substituted",
        }))
        .middleware(RecordingMiddleware::new("B", 2, Arc::clone(&log)))
        .build();

    let reply: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(reply, "substituted");
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        *log.lock(),
        vec![
            "A:before".to_string(),
            "B:after".to_string(),
            "A:after".to_string(),
            "B:finally".to_string(),
            "A:finally".to_string(),
        ]
    );
}

/// Passes a value from its before phase to its after phase through the
/// pipeline state.
struct StatePassingMiddleware {
    log: CallLog,
}

#[derive(Debug, PartialEq)]
struct Carried(&'static str);

#[async_trait]
impl Middleware for StatePassingMiddleware {
    fn name(&self) -> &str {
        "state-passing"
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        Ok(PipelineControl::NextWith(Box::new(Carried("from-before"))))
    }

    async fn after(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: &(dyn std::any::Any + Send),
        state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let carried = state
            .get::<Carried>()
            .ok_or_else(|| HandlerError::from("carried value missing in after phase"))?;
        self.log.lock().push(format!("after saw {}", carried.0));
        Ok(())
    }
}

#[tokio::test]
async fn before_phase_values_reach_later_phases_through_state() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .middleware(Arc::new(StatePassingMiddleware {
            log: Arc::clone(&log),
        }))
        .build();

    let _: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(*log.lock(), vec!["after saw from-before".to_string()]);
}

#[tokio::test]
async fn handler_failure_skips_after_but_runs_finally() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(FailingPingHandler))
        .middleware(RecordingMiddleware::new("A", 1, Arc::clone(&log)))
        .middleware(RecordingMiddleware::new("B", 2, Arc::clone(&log)))
        .build();

    let err = mediator
        .invoke::<Ping, String>(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        DispatchError::HandlerFailed { source, .. } => {
            assert!(source.to_string().contains("handler exploded"));
        }
        other => panic!("expected HandlerFailed, got {other:?}"),
    }

    assert_eq!(
        *log.lock(),
        vec![
            "A:before".to_string(),
            "B:before".to_string(),
            "B:finally".to_string(),
            "A:finally".to_string(),
        ]
    );
}

/// Observes what its finally phase receives.
struct FinallyProbe {
    saw_error: Arc<AtomicUsize>,
}

#[async_trait]
impl Middleware for FinallyProbe {
    fn name(&self) -> &str {
        "finally-probe"
    }

    async fn finally(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: Option<&(dyn std::any::Any + Send)>,
        error: Option<&(dyn std::error::Error + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        if error.is_some() {
            self.saw_error.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn finally_receives_the_inflight_error() {
    let saw_error = Arc::new(AtomicUsize::new(0));
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(FailingPingHandler))
        .middleware(Arc::new(FinallyProbe {
            saw_error: Arc::clone(&saw_error),
        }))
        .build();

    let _ = mediator
        .invoke::<Ping, String>(Ping("hi".to_string()), CancellationToken::new())
        .await;
    assert_eq!(saw_error.load(Ordering::SeqCst), 1);
}

/// Fails in its finally phase.
struct FailingFinallyMiddleware;

#[async_trait]
impl Middleware for FailingFinallyMiddleware {
    fn name(&self) -> &str {
        "failing-finally"
    }

    async fn finally(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _response: Option<&(dyn std::any::Any + Send)>,
        _error: Option<&(dyn std::error::Error + Send + Sync)>,
        _state: &mut PipelineState,
    ) -> Result<(), HandlerError> {
        Err("finally boom".into())
    }
}

#[tokio::test]
async fn finally_failure_replaces_the_inflight_failure() {
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(FailingPingHandler))
        .middleware(Arc::new(FailingFinallyMiddleware))
        .build();

    let err = mediator
        .invoke::<Ping, String>(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        DispatchError::HandlerFailed { source, .. } => {
            assert!(source.to_string().contains("finally boom"));
        }
        other => panic!("expected HandlerFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn finally_failure_surfaces_even_when_the_handler_succeeds() {
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .middleware(Arc::new(FailingFinallyMiddleware))
        .build();

    let err = mediator
        .invoke::<Ping, String>(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::HandlerFailed { .. }));
}

/// Applies only to a single message key.
struct TargetedMiddleware {
    target: mediator_core::MessageKey,
    order: Option<i32>,
    log: CallLog,
}

#[async_trait]
impl Middleware for TargetedMiddleware {
    fn name(&self) -> &str {
        "targeted"
    }

    fn order(&self) -> Option<i32> {
        self.order
    }

    fn scope(&self) -> mediator_core::MiddlewareScope {
        mediator_core::MiddlewareScope::Message
    }

    fn applies_to(&self, key: &mediator_core::MessageKey) -> bool {
        key == &self.target
    }

    async fn before(
        &self,
        _ctx: &DispatchContext,
        _message: &dyn Message,
        _state: &mut PipelineState,
        _cancel: &CancellationToken,
    ) -> Result<PipelineControl, HandlerError> {
        self.log.lock().push("targeted:before".to_string());
        Ok(PipelineControl::Next)
    }
}

#[tokio::test]
async fn middleware_applies_only_to_matching_keys() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .middleware(Arc::new(TargetedMiddleware {
            target: mediator_core::MessageKey::named("not::Ping"),
            order: None,
            log: Arc::clone(&log),
        }))
        .build();

    let _: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn message_specific_middleware_wraps_before_global_on_equal_order() {
    let log = new_call_log();
    let mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        // Registered after the global middleware, but its Message scope
        // outranks Global at equal explicit order.
        .middleware(RecordingMiddleware::new("global", 5, Arc::clone(&log)))
        .middleware(Arc::new(TargetedMiddleware {
            target: mediator_core::MessageKey::of::<Ping>(),
            order: Some(5),
            log: Arc::clone(&log),
        }))
        .build();

    let _: String = mediator
        .invoke(Ping("hi".to_string()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        log.lock()[..2],
        [
            "targeted:before".to_string(),
            "global:before".to_string()
        ]
    );
}
