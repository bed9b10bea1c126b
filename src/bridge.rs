use std::{collections::HashMap, fmt, num::NonZeroUsize};

use tokio::sync::mpsc;

use crate::{
    cache::BoundedCache,
    chat::ChatClientPort,
    config::RouteConfig,
    ingress::{BridgeEvent, EventIngress},
    message::{ChatMessage, classify},
    publish::Publisher,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    DuplicateRoute,
    Registration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BridgeError {}

pub fn duplicate_route(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorKind::DuplicateRoute, message)
}

pub fn registration_failure(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorKind::Registration, message)
}

/// Owns the conversation→subject routing table and the classify→publish
/// loop. The table is immutable for the process lifetime; duplicate
/// conversation names are rejected at construction rather than letting
/// a later registration silently win.
pub struct BridgeRouter {
    routes: HashMap<String, String>,
    ordered_chats: Vec<String>,
    publisher: Publisher,
    dedup: Option<BoundedCache<String, ()>>,
}

impl fmt::Debug for BridgeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRouter")
            .field("routes", &self.routes)
            .field("ordered_chats", &self.ordered_chats)
            .finish_non_exhaustive()
    }
}

impl BridgeRouter {
    pub fn new(
        routes: &[RouteConfig],
        publisher: Publisher,
        dedup_capacity: usize,
    ) -> Result<Self, BridgeError> {
        let mut table = HashMap::with_capacity(routes.len());
        let mut ordered_chats = Vec::with_capacity(routes.len());
        for route in routes {
            if table
                .insert(route.chat.clone(), route.subject.clone())
                .is_some()
            {
                return Err(duplicate_route(format!(
                    "conversation '{}' is routed more than once",
                    route.chat
                )));
            }
            ordered_chats.push(route.chat.clone());
        }

        Ok(Self {
            routes: table,
            ordered_chats,
            publisher,
            dedup: NonZeroUsize::new(dedup_capacity).map(BoundedCache::new),
        })
    }

    /// Registers one listener per configured conversation, in
    /// configuration order, all feeding the shared ingress.
    pub async fn register_routes(
        &self,
        chat_client: &dyn ChatClientPort,
        ingress: &EventIngress,
    ) -> Result<(), BridgeError> {
        for chat in &self.ordered_chats {
            chat_client
                .register_listener(chat, ingress.clone())
                .await
                .map_err(|err| {
                    registration_failure(format!(
                        "failed to register listener for conversation '{chat}': {err}"
                    ))
                })?;
            tracing::info!(
                target: "bridge",
                chat = %chat,
                subject = %self.routes[chat],
                "route_registered"
            );
        }
        Ok(())
    }

    /// Consumes the bounded event queue until the shutdown sentinel
    /// arrives or every sender is gone. Classification is synchronous
    /// and per-conversation ordered; publish faults are logged and
    /// absorbed so the bridge keeps running.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<BridgeEvent>) {
        while let Some(item) = event_rx.recv().await {
            let (chat, event) = match item {
                BridgeEvent::Inbound { chat, event } => (chat, event),
                BridgeEvent::Shutdown => break,
            };

            let message = classify(event);
            tracing::info!(
                target: "bridge",
                chat = %chat,
                variant = message.variant_name(),
                "event_classified"
            );

            let Some(subject) = self.routes.get(&chat).cloned() else {
                tracing::debug!(target: "bridge", chat = %chat, "event_for_unrouted_chat");
                continue;
            };

            if self.is_duplicate(&message) {
                continue;
            }

            // Outcome is already logged by the publisher; a publish
            // fault must not stop the bridge.
            let _ = self.publisher.publish(&subject, &message).await;
        }

        tracing::info!(target: "bridge", "bridge_loop_stopped");
    }

    fn is_duplicate(&mut self, message: &ChatMessage) -> bool {
        let Some(cache) = self.dedup.as_mut() else {
            return false;
        };
        let ChatMessage::Friend { id, .. } = message else {
            return false;
        };
        if id.is_empty() {
            return false;
        }
        if cache.contains(id) {
            tracing::debug!(target: "bridge", message_id = %id, "duplicate_event_dropped");
            return true;
        }
        cache.put(id.clone(), ());
        false
    }
}
