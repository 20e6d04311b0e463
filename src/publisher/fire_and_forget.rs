//! Detached fan-out: handlers run on independent tasks, failures swallowed.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::message::MessageKey;

use super::{NotificationPublisher, PublishTarget};

/// Spawns every handler delegate on its own task and returns without
/// waiting for completion. All handler failures are swallowed at the point
/// of firing: they are logged but never propagate to the publishing caller.
///
/// This is explicitly the least-safe strategy. Use it only for
/// notifications whose loss the application can tolerate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FireAndForgetPublisher;

#[async_trait]
impl NotificationPublisher for FireAndForgetPublisher {
    fn name(&self) -> &'static str {
        "fire-and-forget"
    }

    async fn publish_all(
        &self,
        message_key: &MessageKey,
        targets: Vec<PublishTarget>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        for target in targets {
            let message_key = message_key.clone();
            let (handler, future) = target.start();
            tokio::spawn(async move {
                if let Err(error) = future.await {
                    warn!(
                        message_key = %message_key,
                        handler = %handler,
                        error = %error,
                        "fire-and-forget handler failed; error swallowed by strategy"
                    );
                }
            });
        }
        Ok(())
    }
}
