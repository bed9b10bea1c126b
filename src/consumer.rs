use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::BrokerPort,
    message::OutboundRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlingError {
    pub message: String,
}

impl HandlingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlingError {}

/// Local processing applied to each pulled message before its ack.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, subject: &str, payload: &Bytes) -> Result<(), HandlingError>;
}

/// Default handler: records each drained message in the log, with the
/// structured outbound fields when the payload parses as one.
pub struct LogRecordHandler;

#[async_trait]
impl MessageHandler for LogRecordHandler {
    async fn handle(&self, subject: &str, payload: &Bytes) -> Result<(), HandlingError> {
        let text = std::str::from_utf8(payload)
            .map_err(|err| HandlingError::new(format!("payload is not valid UTF-8: {err}")))?;

        match serde_json::from_str::<OutboundRecord>(text) {
            Ok(record) => tracing::info!(
                target: "consumer",
                subject,
                message_id = %record.id,
                sender = record.sender.as_deref().unwrap_or(""),
                content = %record.content,
                "record_received"
            ),
            Err(_) => tracing::info!(target: "consumer", subject, payload = text, "message_received"),
        }
        Ok(())
    }
}

/// Pull/ack loop over the durable subscription: fetch a bounded batch,
/// handle each message in arrival order, ack each one immediately
/// after its own successful handling. A handling fault leaves that
/// message pending for broker redelivery and does not block the rest
/// of the batch. Cancellation is observed only between batches.
pub struct ConsumerLoop {
    broker: Arc<dyn BrokerPort>,
    handler: Arc<dyn MessageHandler>,
    batch_size: usize,
    fetch_wait: Duration,
    fetch_error_pause: Duration,
}

impl ConsumerLoop {
    pub fn new(
        broker: Arc<dyn BrokerPort>,
        handler: Arc<dyn MessageHandler>,
        batch_size: usize,
        fetch_wait: Duration,
        fetch_error_pause: Duration,
    ) -> Self {
        Self {
            broker,
            handler,
            batch_size: batch_size.max(1),
            fetch_wait,
            fetch_error_pause,
        }
    }

    #[tracing::instrument(name = "consumer_run", target = "consumer", skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.broker.fetch(self.batch_size, self.fetch_wait) => fetched,
            };

            let batch = match fetched {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(target: "consumer", error = %err, "fetch_failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.fetch_error_pause) => {}
                    }
                    continue;
                }
            };

            // An empty batch is the bounded wait expiring, not a fault.
            if batch.is_empty() {
                continue;
            }

            self.drain_batch(batch).await;
        }

        tracing::info!(target: "consumer", "consumer_loop_stopped");
    }

    /// Handles and acks one fetched batch to completion; never
    /// abandoned mid-message, even during shutdown.
    async fn drain_batch(&self, batch: Vec<crate::broker::PulledMessage>) {
        let batch_len = batch.len();
        let mut acked = 0usize;
        let mut faulted = 0usize;

        for message in batch {
            match self.handler.handle(&message.subject, &message.payload).await {
                Ok(()) => match message.ack().await {
                    Ok(()) => acked += 1,
                    Err(err) => {
                        faulted += 1;
                        tracing::error!(target: "consumer", error = %err, "ack_failed");
                    }
                },
                Err(err) => {
                    // Left unacked on purpose; the broker redelivers.
                    faulted += 1;
                    tracing::error!(target: "consumer", error = %err, "handling_failed");
                }
            }
        }

        tracing::debug!(
            target: "consumer",
            batch = batch_len,
            acked,
            faulted,
            "batch_drained"
        );
    }
}
