use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::{Mutex, mpsc};

use crate::message::InboundEvent;

/// Item carried from chat-client connection tasks into the bridge task.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Inbound { chat: String, event: InboundEvent },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressErrorKind {
    Closed,
    QueueClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressError {
    pub kind: IngressErrorKind,
    pub message: String,
}

impl IngressError {
    fn closed() -> Self {
        Self {
            kind: IngressErrorKind::Closed,
            message: "event ingress gate is closed".to_string(),
        }
    }

    fn queue_closed() -> Self {
        Self {
            kind: IngressErrorKind::QueueClosed,
            message: "bridge event queue receiver is closed".to_string(),
        }
    }
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IngressError {}

/// Gated hand-off into the bridge task's bounded queue. Chat-client
/// connection tasks only ever touch this handle; the queue receiver is
/// consumed exclusively by the bridge loop.
#[derive(Clone)]
pub struct EventIngress {
    gate_open: Arc<AtomicBool>,
    send_lock: Arc<Mutex<()>>,
    tx: mpsc::Sender<BridgeEvent>,
}

impl EventIngress {
    pub fn new(tx: mpsc::Sender<BridgeEvent>) -> Self {
        Self {
            gate_open: Arc::new(AtomicBool::new(true)),
            send_lock: Arc::new(Mutex::new(())),
            tx,
        }
    }

    pub fn is_open(&self) -> bool {
        self.gate_open.load(Ordering::Acquire)
    }

    pub async fn send(&self, chat: String, event: InboundEvent) -> Result<(), IngressError> {
        let _guard = self.send_lock.lock().await;
        if !self.gate_open.load(Ordering::Acquire) {
            return Err(IngressError::closed());
        }
        self.tx
            .send(BridgeEvent::Inbound { chat, event })
            .await
            .map_err(|_| IngressError::queue_closed())
    }

    pub async fn close_gate(&self) {
        let _guard = self.send_lock.lock().await;
        self.gate_open.store(false, Ordering::Release);
    }

    /// Enqueues the shutdown sentinel. Bypasses the gate so the bridge
    /// loop can always be told to stop after the gate is closed.
    pub async fn send_shutdown(&self) -> Result<(), IngressError> {
        let _guard = self.send_lock.lock().await;
        self.tx
            .send(BridgeEvent::Shutdown)
            .await
            .map_err(|_| IngressError::queue_closed())
    }
}
