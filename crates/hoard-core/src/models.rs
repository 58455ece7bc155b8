//! Domain models for archived conversations.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation fetched from a provider, normalized to a common format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Hierarchy::is_empty")]
    pub hierarchy: Hierarchy,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn character_count(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }

    pub fn media_count(&self) -> usize {
        self.messages.iter().map(|m| m.attachments.len()).sum()
    }

    /// All attachments in message order.
    pub fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.messages.iter().flat_map(|m| m.attachments.iter())
    }

    pub fn metadata(&self) -> ConversationMetadata {
        ConversationMetadata {
            message_count: self.message_count(),
            character_count: self.character_count(),
            media_count: self.media_count(),
        }
    }
}

/// Counts derived from a conversation body.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    pub message_count: usize,
    pub character_count: usize,
    pub media_count: usize,
}

/// Optional organizational labels a platform attaches to a conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hierarchy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

impl Hierarchy {
    pub fn is_empty(&self) -> bool {
        self.workspace.is_none() && self.project.is_none() && self.folder.is_none()
    }

    /// Labels from outermost to innermost, skipping blanks.
    pub fn labels(&self) -> Vec<&str> {
        [&self.workspace, &self.project, &self.folder]
            .into_iter()
            .filter_map(|label| label.as_deref())
            .filter(|label| !label.trim().is_empty())
            .collect()
    }
}

/// A message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Message roles across different providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl From<&str> for MessageRole {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "user" | "human" => MessageRole::User,
            "assistant" | "agent" | "ai" | "bot" | "model" | "tool" | "function" => {
                MessageRole::Assistant
            }
            _ => MessageRole::System,
        }
    }
}

/// A reference to media attached to a message.
///
/// Attachments have no storage identity of their own: once downloaded, the
/// content is addressed by the SHA-256 of its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline content for artifacts and code blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bytes captured by the provider session. Never persisted.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl Attachment {
    pub fn new(id: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            url: None,
            content: None,
            mime_type: None,
            size: None,
            name: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Bytes that are already in memory and need no download.
    pub fn prefetched_bytes(&self) -> Option<Cow<'_, [u8]>> {
        if let Some(data) = &self.data {
            return Some(Cow::Borrowed(data.as_slice()));
        }
        self.content
            .as_deref()
            .map(|content| Cow::Borrowed(content.as_bytes()))
    }

    /// Trimmed remote URL, if one is set and non-blank.
    pub fn remote_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Attachment types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Document,
    Artifact,
    Code,
}

impl From<&str> for AttachmentKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" | "img" | "picture" => AttachmentKind::Image,
            "video" => AttachmentKind::Video,
            "audio" | "voice" => AttachmentKind::Audio,
            "artifact" => AttachmentKind::Artifact,
            "code" | "snippet" => AttachmentKind::Code,
            _ => AttachmentKind::Document,
        }
    }
}

/// Listing entry returned by a provider before the body is fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
