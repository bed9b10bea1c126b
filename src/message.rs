use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw event delivered by the chat client for a monitored conversation.
///
/// `attr` discriminates the event source; the remaining fields are
/// populated per source and default to empty when the client omits
/// them. `info` is opaque chat metadata carried through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub attr: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub sender_remark: Option<String>,
    #[serde(default)]
    pub tickle_list: Vec<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub info: Value,
}

/// Closed set of classified message variants. Every inbound event maps
/// to exactly one variant; unrecognized attributes land in `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    Friend {
        kind: String,
        id: String,
        content: String,
        sender: Option<String>,
        sender_remark: Option<String>,
        info: Value,
    },
    System {
        content: String,
    },
    Tickle {
        participants: Vec<String>,
    },
    Time {
        timestamp: String,
    },
    SelfSent {
        content: String,
    },
    Unknown {
        attr: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn variant_name(&self) -> &'static str {
        match self {
            ChatMessage::Friend { .. } => "friend",
            ChatMessage::System { .. } => "system",
            ChatMessage::Tickle { .. } => "tickle",
            ChatMessage::Time { .. } => "time",
            ChatMessage::SelfSent { .. } => "self",
            ChatMessage::Unknown { .. } => "unknown",
        }
    }
}

/// Maps an inbound event to its classified variant.
///
/// Pure and total: classification is driven by the discriminating
/// `attr` only, field extraction is a structural mapping, and anything
/// outside the known attributes resolves to `Unknown` rather than an
/// error. The friend arm is listed first; should an upstream client
/// ever overload the attribute, friend-sourced content wins.
pub fn classify(event: InboundEvent) -> ChatMessage {
    match event.attr.as_str() {
        "friend" => ChatMessage::Friend {
            kind: event.kind,
            id: event.id,
            content: event.content,
            sender: event.sender,
            sender_remark: event.sender_remark,
            info: event.info,
        },
        "system" => ChatMessage::System {
            content: event.content,
        },
        "tickle" => ChatMessage::Tickle {
            participants: event.tickle_list,
        },
        "time" => ChatMessage::Time {
            timestamp: event.time.unwrap_or_default(),
        },
        "self" => ChatMessage::SelfSent {
            content: event.content,
        },
        _ => ChatMessage::Unknown {
            attr: event.attr,
            content: event.content,
        },
    }
}

/// Wire payload published for friend messages. The schema is fixed:
/// absent optional fields serialize as `null`, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub r#type: String,
    pub attr: String,
    pub id: String,
    pub content: String,
    pub sender: Option<String>,
    pub sender_remark: Option<String>,
    pub info: Value,
}

impl OutboundRecord {
    /// Builds the wire record for a friend message; other variants are
    /// not forwarded and yield `None`.
    pub fn from_message(message: &ChatMessage) -> Option<Self> {
        let ChatMessage::Friend {
            kind,
            id,
            content,
            sender,
            sender_remark,
            info,
        } = message
        else {
            return None;
        };

        Some(Self {
            r#type: kind.clone(),
            attr: "friend".to_string(),
            id: id.clone(),
            content: content.clone(),
            sender: sender.clone(),
            sender_remark: sender_remark.clone(),
            info: info.clone(),
        })
    }
}
