use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    Connect,
    Subscribe,
    Publish,
    Fetch,
    Ack,
    Encode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BrokerError {}

pub fn connect_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Connect, message)
}

pub fn subscribe_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Subscribe, message)
}

pub fn publish_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Publish, message)
}

pub fn fetch_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Fetch, message)
}

pub fn ack_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Ack, message)
}

pub fn encode_failure(message: impl Into<String>) -> BrokerError {
    BrokerError::new(BrokerErrorKind::Encode, message)
}

/// Per-message acknowledgement handle, consumed exactly once.
#[async_trait]
pub trait AckToken: Send {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;
}

/// One message pulled from the durable subscription. Dropping it
/// without calling `ack` leaves it pending on the broker, which will
/// redeliver per its own retry policy.
pub struct PulledMessage {
    pub subject: String,
    pub payload: Bytes,
    ack: Box<dyn AckToken>,
}

impl PulledMessage {
    pub fn new(subject: String, payload: Bytes, ack: Box<dyn AckToken>) -> Self {
        Self {
            subject,
            payload,
            ack,
        }
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.ack.ack().await
    }
}

impl fmt::Debug for PulledMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulledMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Connected broker handle shared by the publish path and the consumer
/// loop. Publishing carries at-least-once semantics; `fetch` returns
/// whatever arrived within the bounded wait, possibly nothing.
#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BrokerError>;

    async fn fetch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<PulledMessage>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
