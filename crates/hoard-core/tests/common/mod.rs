//! Shared fakes for integration tests: a scripted provider and a scripted
//! media fetcher. Nothing here touches the network.

#![expect(dead_code, reason = "each test binary uses a subset of the fakes")]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hoard_core::config::{MediaConfig, ProviderConfig};
use hoard_core::media::{MediaFetcher, TempDownload};
use hoard_core::models::{
    Attachment, Conversation, ConversationSummary, Hierarchy, Message, MessageRole,
};
use hoard_core::provider::{ListOptions, Provider};
use hoard_core::{Error, Result};

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Media settings with millisecond backoff so retry tests stay fast.
pub fn fast_media_config() -> MediaConfig {
    MediaConfig {
        concurrency: Some(3),
        retry_base_delay_ms: 1,
        sequential_delay_ms: 1,
        ..MediaConfig::default()
    }
}

pub fn conversation(id: &str, updated_secs: i64, messages: usize) -> Conversation {
    Conversation {
        id: id.to_string(),
        title: format!("Conversation {id}"),
        created_at: ts(1_700_000_000),
        updated_at: ts(updated_secs),
        hierarchy: Hierarchy::default(),
        messages: (0..messages)
            .map(|n| Message {
                id: format!("{id}-m{n}"),
                role: if n % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                content: format!("message {n}"),
                timestamp: None,
                attachments: Vec::new(),
            })
            .collect(),
    }
}

pub fn with_attachments(mut conversation: Conversation, attachments: Vec<Attachment>) -> Conversation {
    if conversation.messages.is_empty() {
        conversation.messages.push(Message {
            id: format!("{}-m0", conversation.id),
            role: MessageRole::User,
            content: String::new(),
            timestamp: None,
            attachments: Vec::new(),
        });
    }
    conversation.messages[0].attachments = attachments;
    conversation
}

/// Provider serving an in-memory set of conversations.
#[derive(Default)]
pub struct MockProvider {
    name: String,
    conversations: Mutex<Vec<Conversation>>,
    listed_counts: Mutex<HashMap<String, usize>>,
    fetch_failures: HashMap<String, fn(&str) -> Error>,
    resolved_urls: HashMap<String, String>,
    rate_limit_sensitive: bool,
    ignores_filters: bool,
    pub list_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_conversation(self, conversation: Conversation) -> Self {
        self.put(conversation);
        self
    }

    #[must_use]
    pub fn with_fetch_failure(mut self, id: &str, make: fn(&str) -> Error) -> Self {
        self.fetch_failures.insert(id.to_string(), make);
        self
    }

    /// Fresh URL returned for an attachment id when its link expires.
    #[must_use]
    pub fn with_resolved_url(mut self, attachment_id: &str, url: &str) -> Self {
        self.resolved_urls
            .insert(attachment_id.to_string(), url.to_string());
        self
    }

    #[must_use]
    pub fn rate_limit_sensitive(mut self) -> Self {
        self.rate_limit_sensitive = true;
        self
    }

    /// Serve the full listing regardless of since/until/limit.
    #[must_use]
    pub fn ignoring_filters(mut self) -> Self {
        self.ignores_filters = true;
        self
    }

    /// Add or replace a remote conversation.
    pub fn put(&self, conversation: Conversation) {
        let mut conversations = self.conversations.lock().expect("lock");
        conversations.retain(|c| c.id != conversation.id);
        conversations.push(conversation);
    }

    /// Message count reported in listings for `id`.
    pub fn set_listed_count(&self, id: &str, count: usize) {
        self.listed_counts
            .lock()
            .expect("lock")
            .insert(id.to_string(), count);
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_sensitive(&self) -> bool {
        self.rate_limit_sensitive
    }

    async fn authenticate(&self, _config: &ProviderConfig) -> Result<()> {
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn list_conversations(&self, opts: &ListOptions) -> Result<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let counts = self.listed_counts.lock().expect("lock").clone();
        let mut summaries: Vec<ConversationSummary> = self
            .conversations
            .lock()
            .expect("lock")
            .iter()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                created_at: c.created_at,
                updated_at: c.updated_at,
                message_count: counts.get(&c.id).copied(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if self.ignores_filters {
            return Ok(summaries);
        }
        Ok(opts.apply(summaries))
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Conversation> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = self.fetch_failures.get(id) {
            return Err(make(id));
        }
        self.conversations
            .lock()
            .expect("lock")
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn resolve_media_url(
        &self,
        _conversation_id: &str,
        attachment: &Attachment,
    ) -> Result<Option<String>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.resolved_urls.get(&attachment.id).cloned())
    }
}

/// One scripted response.
#[derive(Clone)]
pub enum Reply {
    Body {
        bytes: Vec<u8>,
        content_type: Option<&'static str>,
    },
    Status(u16),
    /// Writes some bytes, then fails mid-stream.
    Broken,
}

impl Reply {
    pub fn body(bytes: &[u8]) -> Self {
        Reply::Body {
            bytes: bytes.to_vec(),
            content_type: None,
        }
    }

    pub fn typed(bytes: &[u8], content_type: &'static str) -> Self {
        Reply::Body {
            bytes: bytes.to_vec(),
            content_type: Some(content_type),
        }
    }
}

/// Fetcher answering from a per-URL script. The last reply repeats.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, Vec<Reply>>>,
    calls: Mutex<HashMap<String, usize>>,
    cookies_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, url: &str, replies: Vec<Reply>) -> Self {
        self.script
            .lock()
            .expect("lock")
            .insert(url.to_string(), replies);
        self
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().expect("lock").get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("lock").values().sum()
    }

    pub fn cookies_seen(&self) -> Vec<Option<String>> {
        self.cookies_seen.lock().expect("lock").clone()
    }

    fn next_reply(&self, url: &str) -> Option<Reply> {
        let n = {
            let mut calls = self.calls.lock().expect("lock");
            let n = calls.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let script = self.script.lock().expect("lock");
        let replies = script.get(url)?;
        replies.get(n - 1).or_else(|| replies.last()).cloned()
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        url: &str,
        cookies: Option<&str>,
        sink: &mut TempDownload,
    ) -> Result<Option<String>> {
        self.cookies_seen
            .lock()
            .expect("lock")
            .push(cookies.map(str::to_string));
        match self.next_reply(url) {
            Some(Reply::Body {
                bytes,
                content_type,
            }) => {
                for chunk in bytes.chunks(7) {
                    sink.write(chunk).await?;
                }
                Ok(content_type.map(str::to_string))
            }
            Some(Reply::Status(status)) => Err(Error::HttpStatus {
                status,
                url: url.to_string(),
            }),
            Some(Reply::Broken) => {
                sink.write(b"partial").await?;
                Err(Error::Network("connection reset".to_string()))
            }
            None => Err(Error::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// Files left in the archive temp directory.
pub fn temp_files(base: &std::path::Path) -> usize {
    std::fs::read_dir(base.join(".temp")).map_or(0, Iterator::count)
}
