//! Concurrent fan-out: all handlers start before any completion is awaited.

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PublishFailure, Result};
use crate::message::MessageKey;

use super::{into_publish_result, NotificationPublisher, PublishTarget};

/// Starts every handler delegate, then awaits them all. No inter-handler
/// ordering is guaranteed beyond "all started, then all observed complete".
/// Failure semantics match the sequential strategy: every handler runs and
/// all failures are surfaced together.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcurrentPublisher;

#[async_trait]
impl NotificationPublisher for ConcurrentPublisher {
    fn name(&self) -> &'static str {
        "concurrent-wait-all"
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

        let in_flight: Vec<_> = targets
            .into_iter()
            .map(|target| {
                let (handler, future) = target.start();
                async move { (handler, future.await) }
            })
            .collect();

        let failures: Vec<PublishFailure> = join_all(in_flight)
            .await
            .into_iter()
            .filter_map(|(handler, result)| {
                result.err().map(|error| {
                    debug!(
                        message_key = %message_key,
                        handler = %handler,
                        error = %error,
                        "handler failed during concurrent publish"
                    );
                    PublishFailure {
                        handler: handler.to_string(),
                        error,
                    }
                })
            })
            .collect();

        into_publish_result(message_key, total, failures)
    }
}
