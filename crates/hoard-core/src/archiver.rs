//! Archive pass: list a provider, fetch changed conversations, write them to
//! disk, store their media and record them in the index.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MediaConfig;
use crate::error::Result;
use crate::index::{ArchiveIndex, IndexEntry};
use crate::media::{DownloadContext, DownloadResult, MediaStore};
use crate::models::{Conversation, ConversationSummary};
use crate::paths::{ArchiveLayout, CONVERSATION_JSON, CONVERSATION_MARKDOWN, conversation_path};
use crate::provider::{ListOptions, Provider, filter_ids};
use crate::render;

/// Knobs for one archive pass.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub list: ListOptions,
    /// Only these conversation ids.
    pub ids: Option<HashSet<String>>,
    /// Leave already indexed conversations alone.
    pub skip_existing: bool,
    /// Decide and report without fetching or writing anything.
    pub dry_run: bool,
    pub skip_media: bool,
}

/// What a pass did, or would do, with one listed conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    New,
    Update,
    Skip,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlannedItem {
    pub id: String,
    pub title: String,
    pub action: PlannedAction,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationError {
    pub id: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveReport {
    pub provider: String,
    pub dry_run: bool,
    pub listed: usize,
    pub archived_new: usize,
    pub archived_updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub planned: Vec<PlannedItem>,
    pub media: DownloadResult,
    pub errors: Vec<ConversationError>,
    pub elapsed_ms: u64,
}

impl ArchiveReport {
    pub fn archived(&self) -> usize {
        self.archived_new + self.archived_updated
    }
}

/// Runs archive passes for one authenticated provider.
pub struct Archiver<'a> {
    provider: &'a dyn Provider,
    layout: ArchiveLayout,
    store: MediaStore,
}

impl<'a> Archiver<'a> {
    /// Archiver writing under `base_dir/<provider name>` with HTTP media downloads.
    pub async fn open(
        provider: &'a dyn Provider,
        base_dir: impl Into<PathBuf>,
        media: &MediaConfig,
        rate_limit_sensitive: bool,
    ) -> Result<Self> {
        let layout = ArchiveLayout::new(base_dir, provider.name());
        let sensitive = rate_limit_sensitive || provider.rate_limit_sensitive();
        let store = MediaStore::open(layout.clone(), media, sensitive).await?;
        Ok(Self::with_store(provider, store))
    }

    pub fn with_store(provider: &'a dyn Provider, store: MediaStore) -> Self {
        Self {
            provider,
            layout: store.layout().clone(),
            store,
        }
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    /// Execute one pass. Per-conversation failures land in the report;
    /// listing and index/registry persistence failures abort.
    pub async fn run(&self, opts: &ArchiveOptions) -> Result<ArchiveReport> {
        let started = Instant::now();
        let provider_name = self.layout.provider().to_string();
        let mut index = ArchiveIndex::open(&self.layout).await?;

        let listed = self.provider.list_conversations(&opts.list).await?;
        let summaries = filter_ids(opts.list.apply(listed), opts.ids.as_ref());
        info!(provider = %provider_name, listed = summaries.len(), dry_run = opts.dry_run, "Listed conversations");

        let mut report = ArchiveReport {
            provider: provider_name.clone(),
            dry_run: opts.dry_run,
            listed: summaries.len(),
            ..ArchiveReport::default()
        };

        let cookies = if opts.dry_run || opts.skip_media {
            None
        } else {
            self.provider.download_cookies().await
        };

        for summary in &summaries {
            let action = plan(summary, &index, opts.skip_existing);
            report.planned.push(PlannedItem {
                id: summary.id.clone(),
                title: summary.title.clone(),
                action,
            });

            if action == PlannedAction::Skip {
                debug!(conversation_id = %summary.id, "Already archived, skipping");
                report.skipped += 1;
                continue;
            }
            if opts.dry_run {
                continue;
            }

            let existing_path = index.get(&summary.id).map(|e| e.path.clone());
            let (conversation, path) = match self.write_conversation(summary, existing_path).await {
                Ok(written) => written,
                Err(err) => {
                    warn!(conversation_id = %summary.id, error = %err, "Failed to archive conversation");
                    report.failed += 1;
                    report.errors.push(ConversationError {
                        id: summary.id.clone(),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if !opts.skip_media && conversation.media_count() > 0 {
                let ctx = DownloadContext {
                    cookies: cookies.as_deref(),
                    provider: Some(self.provider),
                };
                let media = self.store.download_conversation_media(&conversation, ctx).await;
                debug!(
                    conversation_id = %conversation.id,
                    downloaded = media.downloaded,
                    skipped = media.skipped,
                    failed = media.failed,
                    "Stored conversation media"
                );
                report.media.absorb(media);
                self.store.save_registry().await?;
            }

            index
                .upsert(&conversation.id, IndexEntry::for_conversation(&conversation, path))
                .await?;
            match action {
                PlannedAction::New => report.archived_new += 1,
                _ => report.archived_updated += 1,
            }
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            provider = %provider_name,
            new = report.archived_new,
            updated = report.archived_updated,
            skipped = report.skipped,
            failed = report.failed,
            media_downloaded = report.media.downloaded,
            media_failed = report.media.failed,
            elapsed_ms = report.elapsed_ms,
            "Archive pass finished"
        );
        Ok(report)
    }

    /// Fetch the body and write both on-disk forms.
    async fn write_conversation(
        &self,
        summary: &ConversationSummary,
        existing_path: Option<String>,
    ) -> Result<(Conversation, String)> {
        let conversation = self.provider.fetch_conversation(&summary.id).await?;
        let path = existing_path.unwrap_or_else(|| {
            conversation_path(
                &conversation.id,
                &conversation.title,
                conversation.created_at,
                &conversation.hierarchy.labels(),
            )
        });

        let dir = self.layout.conversation_dir(&path);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(CONVERSATION_JSON), render::to_json(&conversation)?).await?;
        tokio::fs::write(
            dir.join(CONVERSATION_MARKDOWN),
            render::to_markdown(&conversation),
        )
        .await?;
        debug!(conversation_id = %conversation.id, path = %path, "Wrote conversation");
        Ok((conversation, path))
    }
}

fn plan(summary: &ConversationSummary, index: &ArchiveIndex, skip_existing: bool) -> PlannedAction {
    match index.get(&summary.id) {
        None => PlannedAction::New,
        Some(_) if skip_existing => PlannedAction::Skip,
        Some(_) => PlannedAction::Update,
    }
}
