//! Adapter payloads and their normalization into core types.
//!
//! Adapters speak camelCase JSON with unix-millisecond timestamps and leave
//! most fields optional. Everything is converted to `hoard_core::models`
//! right here so nothing downstream sees adapter shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hoard_core::models::{
    Attachment, AttachmentKind, Conversation, ConversationSummary, Hierarchy, Message, MessageRole,
};

/// Reply to `authenticate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthReply {
    pub authenticated: bool,
    /// Cookie header for media downloads.
    #[serde(default)]
    pub cookies: Option<String>,
    /// Opaque state handed back to the adapter on later calls.
    #[serde(default)]
    pub session: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub message_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<WireAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttachment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Reply to `resolveMedia`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedMedia {
    #[serde(default)]
    pub url: Option<String>,
}

/// Unix milliseconds to UTC; out-of-range values fall back to the epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<WireSummary> for ConversationSummary {
    fn from(wire: WireSummary) -> Self {
        let created_at = from_millis(wire.created_at);
        Self {
            id: wire.id,
            title: wire.title.unwrap_or_default(),
            created_at,
            updated_at: wire.updated_at.map_or(created_at, from_millis),
            message_count: wire.message_count,
        }
    }
}

impl From<WireConversation> for Conversation {
    fn from(wire: WireConversation) -> Self {
        let created_at = from_millis(wire.created_at);
        let messages = wire
            .messages
            .into_iter()
            .enumerate()
            .map(|(n, message)| normalize_message(&wire.id, n, message))
            .collect();
        Self {
            title: wire.title.unwrap_or_default(),
            created_at,
            updated_at: wire.updated_at.map_or(created_at, from_millis),
            hierarchy: Hierarchy {
                workspace: non_blank(wire.workspace),
                project: non_blank(wire.project),
                folder: non_blank(wire.folder),
            },
            messages,
            id: wire.id,
        }
    }
}

fn normalize_message(conversation_id: &str, n: usize, wire: WireMessage) -> Message {
    let id = non_blank(wire.id).unwrap_or_else(|| format!("{conversation_id}-{n}"));
    let attachments = wire
        .attachments
        .into_iter()
        .enumerate()
        .map(|(a, attachment)| normalize_attachment(&id, a, attachment))
        .collect();
    Message {
        role: MessageRole::from(wire.role.as_str()),
        content: wire.content,
        timestamp: wire.created_at.map(from_millis),
        attachments,
        id,
    }
}

fn normalize_attachment(message_id: &str, n: usize, wire: WireAttachment) -> Attachment {
    let id = non_blank(wire.id).unwrap_or_else(|| format!("{message_id}-a{n}"));
    let kind = wire
        .kind
        .as_deref()
        .map_or(AttachmentKind::Document, AttachmentKind::from);
    let mut attachment = Attachment::new(id, kind);
    attachment.url = non_blank(wire.url);
    attachment.content = wire.content;
    attachment.mime_type = non_blank(wire.mime_type);
    attachment.size = wire.size;
    attachment.name = non_blank(wire.name);
    attachment
}
