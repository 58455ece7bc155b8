//! Content-addressed media store.
//!
//! Every attachment's bytes are stored once per provider under
//! `media/<category>/<sha256><ext>`. A JSON registry maps each hash to its
//! file and the conversations that reference it.

mod classify;
mod fetch;
mod registry;
mod temp;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::models::{Attachment, Conversation};
use crate::paths::ArchiveLayout;
use crate::provider::Provider;
use crate::retry::RetryPolicy;

pub use classify::{Classification, MediaCategory, classify};
pub use fetch::{HttpFetcher, MediaFetcher};
pub use registry::{CategoryStats, MediaRegistry, MediaStats, RegistryEntry};
pub use temp::{ContentDigest, TempDownload, temp_file_name};

/// Outcome of storing one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
    /// Content was already stored; only a reference was added.
    pub skipped: bool,
}

/// Per-conversation download collaborators.
#[derive(Clone, Copy, Default)]
pub struct DownloadContext<'a> {
    /// Cookie header for authenticated asset hosts.
    pub cookies: Option<&'a str>,
    /// Asked for fresh URLs when a signed link has expired.
    pub provider: Option<&'a dyn Provider>,
}

/// One attachment that could not be stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MediaError {
    pub attachment_id: String,
    pub url: Option<String>,
    pub kind: String,
    pub message: String,
}

/// Totals for a batch of attachments.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DownloadResult {
    /// New files written to the store.
    pub downloaded: usize,
    /// Not stored: already present, blank or unsupported.
    pub skipped: usize,
    /// Subset of `skipped` whose content was already in the store.
    pub deduplicated: usize,
    pub failed: usize,
    /// Bytes of newly written files.
    pub bytes: u64,
    pub errors: Vec<MediaError>,
}

impl DownloadResult {
    pub fn absorb(&mut self, other: DownloadResult) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.deduplicated += other.deduplicated;
        self.failed += other.failed;
        self.bytes += other.bytes;
        self.errors.extend(other.errors);
    }
}

/// Result of a garbage collection run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct GcResult {
    /// Registry entries dropped.
    pub entries_removed: usize,
    pub files_removed: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    NoSource,
    Unsupported,
}

/// Deduplicating store for one provider's media.
pub struct MediaStore {
    layout: ArchiveLayout,
    registry: Mutex<MediaRegistry>,
    fetcher: Arc<dyn MediaFetcher>,
    retry: RetryPolicy,
    concurrency: usize,
    sequential_delay: Option<Duration>,
    unsupported_prefixes: Vec<String>,
    expiring_url_patterns: Vec<String>,
}

impl MediaStore {
    /// Open the store with an HTTP fetcher built from `config`.
    pub async fn open(
        layout: ArchiveLayout,
        config: &MediaConfig,
        rate_limit_sensitive: bool,
    ) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.request_timeout())?);
        Self::with_fetcher(layout, config, rate_limit_sensitive, fetcher).await
    }

    pub async fn with_fetcher(
        layout: ArchiveLayout,
        config: &MediaConfig,
        rate_limit_sensitive: bool,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Result<Self> {
        let registry = MediaRegistry::load(layout.registry_path()).await?;
        debug!(
            provider = layout.provider(),
            entries = registry.len(),
            "Loaded media registry"
        );
        Ok(Self {
            layout,
            registry: Mutex::new(registry),
            fetcher,
            retry: RetryPolicy::rate_limited(config.max_retries, config.retry_base_delay()),
            concurrency: config.effective_concurrency(rate_limit_sensitive),
            sequential_delay: rate_limit_sensitive.then(|| config.sequential_delay()),
            unsupported_prefixes: config.unsupported_prefixes.clone(),
            expiring_url_patterns: config.expiring_url_patterns.clone(),
        })
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Store one attachment's bytes, downloading them unless they are inline.
    ///
    /// With `defer_save` the registry change stays in memory until
    /// [`MediaStore::save_registry`].
    pub async fn store_attachment(
        &self,
        attachment: &Attachment,
        conversation_id: &str,
        cookies: Option<&str>,
        defer_save: bool,
    ) -> Result<StoredMedia> {
        let (temp, content_type) = match attachment.prefetched_bytes() {
            Some(bytes) => {
                let mut temp = TempDownload::create(&self.layout.temp_dir()).await?;
                temp.write(&bytes).await?;
                (temp, None)
            }
            None => {
                let url = attachment.remote_url().ok_or_else(|| {
                    Error::Other(format!("attachment {} has no URL or content", attachment.id))
                })?;
                self.download(url, cookies).await?
            }
        };

        let stored = self
            .commit(temp, attachment, content_type.as_deref(), conversation_id)
            .await?;
        if !defer_save {
            self.save_registry().await?;
        }
        Ok(stored)
    }

    /// Store every attachment of a conversation, continuing past failures.
    ///
    /// The registry is not saved; callers save once per conversation.
    pub async fn download_conversation_media(
        &self,
        conversation: &Conversation,
        ctx: DownloadContext<'_>,
    ) -> DownloadResult {
        let mut result = DownloadResult::default();
        let mut pending = Vec::new();
        for attachment in conversation.attachments() {
            match self.skip_reason(attachment) {
                Some(reason) => {
                    debug!(
                        conversation_id = %conversation.id,
                        attachment_id = %attachment.id,
                        ?reason,
                        "Skipping attachment"
                    );
                    result.skipped += 1;
                }
                None => pending.push(attachment),
            }
        }

        let outcomes: Vec<(&Attachment, Result<StoredMedia>)> = match self.sequential_delay {
            Some(delay) => {
                let mut outcomes = Vec::with_capacity(pending.len());
                for (n, attachment) in pending.into_iter().enumerate() {
                    if n > 0 {
                        tokio::time::sleep(delay).await;
                    }
                    let outcome = self.fetch_attachment(attachment, &conversation.id, ctx).await;
                    outcomes.push((attachment, outcome));
                }
                outcomes
            }
            None => {
                futures::stream::iter(pending)
                    .map(|attachment| async move {
                        let outcome = self.fetch_attachment(attachment, &conversation.id, ctx).await;
                        (attachment, outcome)
                    })
                    .buffer_unordered(self.concurrency.max(1))
                    .collect()
                    .await
            }
        };

        for (attachment, outcome) in outcomes {
            match outcome {
                Ok(stored) if stored.skipped => {
                    result.skipped += 1;
                    result.deduplicated += 1;
                }
                Ok(stored) => {
                    result.downloaded += 1;
                    result.bytes += stored.size;
                }
                Err(err) => {
                    warn!(
                        conversation_id = %conversation.id,
                        attachment_id = %attachment.id,
                        error = %err,
                        "Attachment failed"
                    );
                    result.failed += 1;
                    result.errors.push(MediaError {
                        attachment_id: attachment.id.clone(),
                        url: attachment.remote_url().map(str::to_string),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        result
    }

    /// Drop references to conversations outside `live` and delete content
    /// nothing references any more.
    pub async fn garbage_collect(&self, live: &HashSet<String>) -> Result<GcResult> {
        let mut registry = self.registry.lock().await;
        let orphaned = registry.retain_live(live);
        let mut result = GcResult::default();
        for (hash, entry) in orphaned {
            result.entries_removed += 1;
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    result.files_removed += 1;
                    result.bytes_freed += entry.size;
                    debug!(%hash, path = %entry.path.display(), "Removed orphaned media");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(%hash, path = %entry.path.display(), "Orphaned media already gone");
                }
                Err(e) => {
                    warn!(%hash, path = %entry.path.display(), error = %e, "Failed to remove orphaned media");
                }
            }
        }
        registry.save().await?;
        Ok(result)
    }

    pub async fn stats(&self) -> MediaStats {
        self.registry.lock().await.stats()
    }

    /// Snapshot of one registry entry.
    pub async fn entry(&self, hash: &str) -> Option<RegistryEntry> {
        self.registry.lock().await.get(hash).cloned()
    }

    /// Persist the registry if it changed. Returns whether a write happened.
    pub async fn save_registry(&self) -> Result<bool> {
        self.registry.lock().await.save().await
    }

    fn skip_reason(&self, attachment: &Attachment) -> Option<SkipReason> {
        if attachment.prefetched_bytes().is_some() {
            return None;
        }
        let Some(url) = attachment.remote_url() else {
            return Some(SkipReason::NoSource);
        };
        if self
            .unsupported_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
        {
            return Some(SkipReason::Unsupported);
        }
        None
    }

    fn is_expiring(&self, url: &str) -> bool {
        self.expiring_url_patterns
            .iter()
            .any(|pattern| url.contains(pattern.as_str()))
    }

    /// Store one attachment, re-resolving an expired signed link once.
    async fn fetch_attachment(
        &self,
        attachment: &Attachment,
        conversation_id: &str,
        ctx: DownloadContext<'_>,
    ) -> Result<StoredMedia> {
        let err = match self
            .store_attachment(attachment, conversation_id, ctx.cookies, true)
            .await
        {
            Ok(stored) => return Ok(stored),
            Err(err) => err,
        };

        let Some(url) = attachment.remote_url() else {
            return Err(err);
        };
        if !err.is_link_expired() || !self.is_expiring(url) {
            return Err(err);
        }
        let Some(provider) = ctx.provider else {
            return Err(err);
        };

        debug!(conversation_id, attachment_id = %attachment.id, "Resolving expired media link");
        let Some(fresh) = provider.resolve_media_url(conversation_id, attachment).await? else {
            return Err(err);
        };
        let mut resolved = attachment.clone();
        resolved.url = Some(fresh);
        self.store_attachment(&resolved, conversation_id, ctx.cookies, true)
            .await
    }

    async fn download(
        &self,
        url: &str,
        cookies: Option<&str>,
    ) -> Result<(TempDownload, Option<String>)> {
        let temp_dir = self.layout.temp_dir();
        let temp_dir = &temp_dir;
        self.retry
            .run(|attempt| async move {
                if attempt > 0 {
                    debug!(url, attempt, "Retrying media download");
                }
                let mut temp = TempDownload::create(temp_dir).await?;
                let content_type = self.fetcher.fetch(url, cookies, &mut temp).await?;
                Ok((temp, content_type))
            })
            .await
    }

    /// Hash the temp file's content and either reference or place it.
    async fn commit(
        &self,
        mut temp: TempDownload,
        attachment: &Attachment,
        content_type: Option<&str>,
        conversation_id: &str,
    ) -> Result<StoredMedia> {
        let digest = temp.finish().await?;
        let mut registry = self.registry.lock().await;

        if let Some(existing) = registry.reference(&digest.hash, conversation_id) {
            debug!(hash = %digest.hash, conversation_id, "Media already stored");
            return Ok(StoredMedia {
                path: existing.path.clone(),
                hash: digest.hash,
                size: existing.size,
                skipped: true,
            });
        }

        let classification = classify(attachment, content_type);
        let dir = self.layout.media_dir(classification.category);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await
            && e.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(e.into());
        }
        let dest = dir.join(format!("{}{}", digest.hash, classification.extension));
        place(temp.path(), &dest).await?;
        drop(temp);

        let path = std::path::absolute(&dest).unwrap_or(dest);
        debug!(hash = %digest.hash, path = %path.display(), size = digest.size, "Stored media");
        registry.insert(
            digest.hash.clone(),
            RegistryEntry {
                path: path.clone(),
                size: digest.size,
                mime_type: classification.mime_type,
                category: classification.category,
                first_seen: Utc::now(),
                references: vec![conversation_id.to_string()],
            },
        );
        Ok(StoredMedia {
            path,
            hash: digest.hash,
            size: digest.size,
            skipped: false,
        })
    }
}

/// Copy `src` next to `dest` and rename it into place. The temp dir may sit
/// on another filesystem, so a plain rename is not enough.
async fn place(src: &std::path::Path, dest: &std::path::Path) -> Result<()> {
    let mut staging = dest.as_os_str().to_owned();
    staging.push(".partial");
    let staging = PathBuf::from(staging);
    if let Err(e) = tokio::fs::copy(src, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&staging, dest).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }
    Ok(())
}
