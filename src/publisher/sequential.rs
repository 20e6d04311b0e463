//! Sequential fan-out: handlers run one at a time in registration order.

use std::task::Poll;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PublishFailure, Result};
use crate::message::MessageKey;

use super::{into_publish_result, NotificationPublisher, PublishTarget};

/// Invokes handlers strictly in registration order. A delegate that is
/// already complete after its first poll never yields to the scheduler, so
/// chains of fast synchronous handlers free-run without suspension. Every
/// handler runs regardless of earlier failures; all failures are collected
/// and surfaced together after the last handler completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialPublisher;

#[async_trait]
impl NotificationPublisher for SequentialPublisher {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn publish_all(
        &self,
        message_key: &MessageKey,
        targets: Vec<PublishTarget>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let total = targets.len();
        if total == 0 {
            return Ok(());
        }

        let mut failures = Vec::new();
        for target in targets {
            let (handler, future) = target.start();
            let mut future = std::pin::pin!(future);
            // Suspend only when the delegate is not already complete.
            let result = match futures::poll!(future.as_mut()) {
                Poll::Ready(result) => result,
                Poll::Pending => future.await,
            };
            if let Err(error) = result {
                debug!(
                    message_key = %message_key,
                    handler = %handler,
                    error = %error,
                    "handler failed during sequential publish; continuing with remaining handlers"
                );
                failures.push(PublishFailure {
                    handler: handler.to_string(),
                    error,
                });
            }
        }

        into_publish_result(message_key, total, failures)
    }
}
