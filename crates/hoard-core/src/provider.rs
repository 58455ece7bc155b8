//! Provider capability interface and strategy registry.
//!
//! A provider is the collaborator that knows how to talk to one remote chat
//! platform. The archive core only sees this trait; concrete strategies are
//! registered with a [`ProviderRegistry`] and chosen by configuration.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::models::{Attachment, Conversation, ConversationSummary};

/// Listing filters forwarded to the provider.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn is_filtered(&self) -> bool {
        self.since.is_some() || self.until.is_some() || self.limit.is_some()
    }

    /// Apply the filters locally, for providers that cannot filter remotely.
    pub fn apply(&self, mut summaries: Vec<ConversationSummary>) -> Vec<ConversationSummary> {
        summaries.retain(|s| {
            self.since.is_none_or(|since| s.updated_at >= since)
                && self.until.is_none_or(|until| s.updated_at <= until)
        });
        if let Some(limit) = self.limit {
            summaries.truncate(limit);
        }
        summaries
    }
}

/// Restrict a listing to an explicit id set.
pub fn filter_ids(
    summaries: Vec<ConversationSummary>,
    ids: Option<&HashSet<String>>,
) -> Vec<ConversationSummary> {
    match ids {
        Some(ids) => summaries.into_iter().filter(|s| ids.contains(&s.id)).collect(),
        None => summaries,
    }
}

/// Source of conversations for one remote platform.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Rate-limit-sensitive providers get sequential media downloads.
    fn rate_limit_sensitive(&self) -> bool {
        false
    }

    async fn authenticate(&self, config: &ProviderConfig) -> Result<()>;

    async fn is_authenticated(&self) -> bool;

    async fn list_conversations(&self, opts: &ListOptions) -> Result<Vec<ConversationSummary>>;

    async fn fetch_conversation(&self, id: &str) -> Result<Conversation>;

    /// Cookie header to send with media downloads.
    async fn download_cookies(&self) -> Option<String> {
        None
    }

    /// Fresh URL for an attachment whose signed link expired.
    async fn resolve_media_url(
        &self,
        _conversation_id: &str,
        _attachment: &Attachment,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds providers of one strategy.
pub trait ProviderFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Higher wins when several factories support a config.
    fn priority(&self) -> i32 {
        0
    }

    fn supports(&self, config: &ProviderConfig) -> bool;

    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>>;
}

/// Priority-ordered set of provider strategies.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: Vec<Box<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn ProviderFactory>) {
        self.factories.push(factory);
        // Stable sort keeps registration order among equal priorities.
        self.factories.sort_by_key(|f| std::cmp::Reverse(f.priority()));
    }

    pub fn factory_names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Strategy that would serve this config.
    pub fn select(&self, config: &ProviderConfig) -> Option<&dyn ProviderFactory> {
        self.factories
            .iter()
            .find(|f| f.supports(config))
            .map(|f| f.as_ref())
    }

    pub fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>> {
        let factory = self.select(config).ok_or_else(|| {
            Error::Config(format!(
                "no provider strategy supports '{}' (adapter '{}')",
                config.name,
                config.adapter_name()
            ))
        })?;
        tracing::debug!(provider = %config.name, strategy = factory.name(), "Selected provider strategy");
        factory.create(config)
    }
}
