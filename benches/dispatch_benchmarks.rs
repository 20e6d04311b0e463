//! Criterion benchmarks for the dispatch hot paths.

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};

use mediator_core::{
    impl_message, CancellationToken, DispatchContext, HandlerError, Mediator,
    NotificationHandler, RequestHandler,
};

struct Ping(String);
impl_message!(Ping);

struct PingHandler;

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

struct NoopNotificationA;

#[async_trait]
impl NotificationHandler<Ping> for NoopNotificationA {
    async fn handle(
        &self,
        _message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

struct NoopNotificationB;

#[async_trait]
impl NotificationHandler<Ping> for NoopNotificationB {
    async fn handle(
        &self,
        _message: &Ping,
        _ctx: &DispatchContext,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn dispatch_benchmarks(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("failed to build runtime");

    let invoke_mediator = Mediator::builder()
        .register::<Ping, _>(Arc::new(PingHandler))
        .build();
    c.bench_function("invoke_single_handler", |b| {
        b.iter(|| {
            let reply: String = runtime
                .block_on(invoke_mediator.invoke(Ping("hi".to_string()), CancellationToken::new()))
                .expect("invoke failed");
            reply
        })
    });

    let publish_mediator = Mediator::builder()
        .register_notification::<Ping, _>(Arc::new(NoopNotificationA))
        .register_notification::<Ping, _>(Arc::new(NoopNotificationB))
        .build();
    c.bench_function("publish_fanout", |b| {
        b.iter(|| {
            runtime
                .block_on(publish_mediator.publish(Ping("hi".to_string()), CancellationToken::new()))
                .expect("publish failed");
        })
    });
}

criterion_group!(benches, dispatch_benchmarks);
criterion_main!(benches);
