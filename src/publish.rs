use std::sync::Arc;

use crate::{
    broker::{BrokerError, BrokerPort, encode_failure},
    message::{ChatMessage, OutboundRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Skipped,
}

/// Publish path for classified messages. Only friend messages are
/// forwarded; every other variant is logged and dropped here. Exactly
/// one publish attempt per friend message, no batching and no retry —
/// redelivery posture is the broker client's concern.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn BrokerPort>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn BrokerPort>) -> Self {
        Self { broker }
    }

    pub async fn publish(
        &self,
        subject: &str,
        message: &ChatMessage,
    ) -> Result<PublishOutcome, BrokerError> {
        let Some(record) = OutboundRecord::from_message(message) else {
            tracing::info!(
                target: "publish",
                variant = message.variant_name(),
                "variant_not_forwarded"
            );
            return Ok(PublishOutcome::Skipped);
        };

        let payload = serde_json::to_vec(&record)
            .map_err(|err| encode_failure(format!("failed to encode outbound record: {err}")))?;

        match self.broker.publish(subject, payload.into()).await {
            Ok(()) => {
                tracing::debug!(
                    target: "publish",
                    subject,
                    message_id = %record.id,
                    "message_published"
                );
                Ok(PublishOutcome::Published)
            }
            Err(err) => {
                tracing::error!(
                    target: "publish",
                    subject,
                    message_id = %record.id,
                    error = %err,
                    "publish_failed"
                );
                Err(err)
            }
        }
    }
}
