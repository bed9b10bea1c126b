use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::{
    broker::{
        AckToken, BrokerError, BrokerPort, PulledMessage, ack_failure, connect_failure,
        fetch_failure, publish_failure, subscribe_failure,
    },
    config::BrokerConfig,
};

/// JetStream-backed broker handle. Connecting ensures the stream and
/// the durable pull consumer exist, so the pull subscription survives
/// process restarts.
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    consumer: PullConsumer,
}

impl NatsBroker {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = async_nats::connect(&config.url).await.map_err(|err| {
            connect_failure(format!("failed to connect to broker {}: {err}", config.url))
        })?;
        let jetstream = jetstream::new(client.clone());

        let stream = jetstream
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: vec![config.subjects.clone()],
                ..Default::default()
            })
            .await
            .map_err(|err| {
                subscribe_failure(format!(
                    "failed to ensure stream {}: {err}",
                    config.stream
                ))
            })?;

        let consumer = stream
            .get_or_create_consumer(
                &config.durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.durable.clone()),
                    filter_subject: config.consume_subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| {
                subscribe_failure(format!(
                    "failed to ensure durable consumer {}: {err}",
                    config.durable
                ))
            })?;

        tracing::info!(
            target: "broker",
            url = %config.url,
            stream = %config.stream,
            durable = %config.durable,
            "broker_connected"
        );

        Ok(Self {
            client,
            jetstream,
            consumer,
        })
    }
}

struct NatsAckToken {
    message: jetstream::Message,
}

#[async_trait]
impl AckToken for NatsAckToken {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|err| ack_failure(format!("failed to ack message: {err}")))
    }
}

#[async_trait]
impl BrokerPort for NatsBroker {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError> {
        let publish_ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|err| publish_failure(format!("publish to {subject} rejected: {err}")))?;
        publish_ack
            .await
            .map_err(|err| publish_failure(format!("publish to {subject} not acked: {err}")))?;
        Ok(())
    }

    async fn fetch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<PulledMessage>, BrokerError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(max_messages.max(1))
            .expires(wait)
            .messages()
            .await
            .map_err(|err| fetch_failure(format!("batch fetch failed: {err}")))?;

        let mut pulled = Vec::new();
        while let Some(next) = batch.next().await {
            let message =
                next.map_err(|err| fetch_failure(format!("batch stream failed: {err}")))?;
            let subject = message.subject.to_string();
            let payload = message.payload.clone();
            pulled.push(PulledMessage::new(
                subject,
                payload,
                Box::new(NatsAckToken { message }),
            ));
        }
        Ok(pulled)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.client
            .flush()
            .await
            .map_err(|err| connect_failure(format!("failed to flush broker connection: {err}")))
    }
}
