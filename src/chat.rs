use std::{
    collections::HashMap,
    fmt, fs,
    io::ErrorKind,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::RwLock,
};
use tokio_util::sync::CancellationToken;

use crate::{ingress::EventIngress, message::InboundEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatClientError {
    pub message: String,
}

impl ChatClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ChatClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ChatClientError {}

/// Connected chat-client handle. The core only depends on listener
/// registration and orderly release; event detection itself lives on
/// the other side of this port.
#[async_trait]
pub trait ChatClientPort: Send + Sync {
    async fn register_listener(
        &self,
        conversation: &str,
        ingress: EventIngress,
    ) -> Result<(), ChatClientError>;

    async fn close(&self) -> Result<(), ChatClientError>;
}

/// One NDJSON line from a chat automation process.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    chat: String,
    event: InboundEvent,
}

/// Chat-client adapter fed over a unix socket: each connected
/// automation process writes one JSON envelope per line. Envelopes for
/// conversations with a registered listener are handed into that
/// listener's ingress; everything else is dropped with a debug log.
pub struct SocketChatClient {
    socket_path: PathBuf,
    listeners: Arc<RwLock<HashMap<String, EventIngress>>>,
}

impl SocketChatClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        Self::prepare_socket_path(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("unable to bind socket {}", self.socket_path.display()))?;

        tracing::info!(
            target: "chat",
            socket = %self.socket_path.display(),
            "chat_socket_listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let listeners = Arc::clone(&self.listeners);
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, listeners).await {
                                    tracing::warn!(
                                        target: "chat",
                                        error = %format!("{err:#}"),
                                        "chat_connection_failed"
                                    );
                                }
                            });
                        }
                        Err(err) => {
                            tracing::warn!(target: "chat", error = %err, "chat_accept_failed");
                        }
                    }
                }
            }
        }

        Self::cleanup_socket_path(&self.socket_path)?;
        Ok(())
    }

    fn prepare_socket_path(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("unable to create socket directory {}", parent.display())
            })?;
        }

        match fs::metadata(path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                fs::remove_file(path).with_context(|| {
                    format!("unable to remove stale socket {}", path.display())
                })?;
            }
            Ok(_) => bail!(
                "socket path {} exists and is not a unix socket",
                path.display()
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("unable to inspect socket path {}", path.display()));
            }
        }
        Ok(())
    }

    fn cleanup_socket_path(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("unable to remove socket {}", path.display()))
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    listeners: Arc<RwLock<HashMap<String, EventIngress>>>,
) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await.context("socket read failed")? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope: EventEnvelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(target: "chat", error = %err, "malformed_event_line");
                continue;
            }
        };

        let ingress = {
            let listeners = listeners.read().await;
            listeners.get(&envelope.chat).cloned()
        };
        let Some(ingress) = ingress else {
            tracing::debug!(target: "chat", chat = %envelope.chat, "event_for_unregistered_chat");
            continue;
        };

        if let Err(err) = ingress.send(envelope.chat, envelope.event).await {
            tracing::warn!(target: "chat", error = %err, "event_handoff_rejected");
        }
    }
    Ok(())
}

#[async_trait]
impl ChatClientPort for SocketChatClient {
    async fn register_listener(
        &self,
        conversation: &str,
        ingress: EventIngress,
    ) -> Result<(), ChatClientError> {
        let mut listeners = self.listeners.write().await;
        if listeners
            .insert(conversation.to_string(), ingress)
            .is_some()
        {
            tracing::warn!(
                target: "chat",
                chat = conversation,
                "listener_replaced_for_chat"
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ChatClientError> {
        let mut listeners = self.listeners.write().await;
        listeners.clear();
        tracing::info!(target: "chat", "chat_client_closed");
        Ok(())
    }
}
