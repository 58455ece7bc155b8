//! Status and verification: compare the remote listing with the local archive.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ReconcileConfig;
use crate::error::{Error, Result};
use crate::index::{ArchiveIndex, IndexEntry};
use crate::media::MediaRegistry;
use crate::models::ConversationSummary;
use crate::paths::{ArchiveLayout, CONTENT_FILES};
use crate::provider::{ListOptions, Provider};

/// Remote timestamps up to this many milliseconds newer than the archived
/// revision still count as archived.
pub const DEFAULT_TOLERANCE_MS: i64 = 1_000;

/// Sync state of one remote conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    New,
    Updated,
    Archived,
}

/// `remote > local + tolerance` is updated; equality at the boundary is not.
pub fn classify_summary(
    summary: &ConversationSummary,
    local: Option<&IndexEntry>,
    tolerance_ms: i64,
) -> SyncState {
    let Some(local) = local else {
        return SyncState::New;
    };
    let tolerance = TimeDelta::milliseconds(tolerance_ms);
    if summary.updated_at > local.updated_at + tolerance {
        SyncState::Updated
    } else {
        SyncState::Archived
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&ConversationSummary> for RemoteItem {
    fn from(summary: &ConversationSummary) -> Self {
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            updated_at: summary.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StaleItem {
    pub id: String,
    pub title: String,
    pub local_updated_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalItem {
    pub id: String,
    pub title: String,
    pub path: String,
}

/// Listing message count disagrees with the archived one.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CountMismatch {
    pub id: String,
    pub local: usize,
    pub remote: usize,
}

/// Remote listing versus local index.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub provider: String,
    /// The remote listing was narrowed by since/until/limit, so local-only
    /// entries may simply be outside the window.
    pub filtered: bool,
    pub remote_count: usize,
    pub local_count: usize,
    pub new: Vec<RemoteItem>,
    pub updated: Vec<StaleItem>,
    pub archived: Vec<String>,
    pub local_only: Vec<LocalItem>,
    pub count_mismatches: Vec<CountMismatch>,
}

impl StatusReport {
    /// Anything the archive is missing or holds out of date.
    pub fn has_drift(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty() || !self.count_mismatches.is_empty()
    }
}

/// Classify every remote summary against the index.
pub fn compare(
    provider: &str,
    index: &ArchiveIndex,
    summaries: &[ConversationSummary],
    tolerance_ms: i64,
    filtered: bool,
) -> StatusReport {
    let mut report = StatusReport {
        provider: provider.to_string(),
        filtered,
        remote_count: summaries.len(),
        local_count: index.len(),
        ..StatusReport::default()
    };

    let mut remote_ids = HashSet::with_capacity(summaries.len());
    for summary in summaries {
        remote_ids.insert(summary.id.as_str());
        let local = index.get(&summary.id);
        match classify_summary(summary, local, tolerance_ms) {
            SyncState::New => report.new.push(summary.into()),
            SyncState::Updated => {
                if let Some(local) = local {
                    report.updated.push(StaleItem {
                        id: summary.id.clone(),
                        title: summary.title.clone(),
                        local_updated_at: local.updated_at,
                        remote_updated_at: summary.updated_at,
                    });
                }
            }
            SyncState::Archived => report.archived.push(summary.id.clone()),
        }

        if let (Some(local), Some(remote)) = (local, summary.message_count)
            && local.message_count != remote
        {
            report.count_mismatches.push(CountMismatch {
                id: summary.id.clone(),
                local: local.message_count,
                remote,
            });
        }
    }

    report.local_only = index
        .entries()
        .values()
        .filter(|entry| !remote_ids.contains(entry.id.as_str()))
        .map(|entry| LocalItem {
            id: entry.id.clone(),
            title: entry.title.clone(),
            path: entry.path.clone(),
        })
        .collect();
    report
}

/// List the provider and compare with the local index.
pub async fn status(
    provider: &dyn Provider,
    layout: &ArchiveLayout,
    opts: &ListOptions,
    tolerance_ms: i64,
) -> Result<StatusReport> {
    let index = ArchiveIndex::open(layout).await?;
    // Providers may ignore the window; narrow it locally like an archive pass.
    let summaries = opts.apply(provider.list_conversations(opts).await?);
    let report = compare(
        layout.provider(),
        &index,
        &summaries,
        tolerance_ms,
        opts.is_filtered(),
    );
    info!(
        provider = layout.provider(),
        remote = report.remote_count,
        local = report.local_count,
        new = report.new.len(),
        updated = report.updated.len(),
        local_only = report.local_only.len(),
        "Status computed"
    );
    Ok(report)
}

/// What `verify` should check beyond local integrity.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub list: ListOptions,
    /// Fetch every remote body and compare counts.
    pub full: bool,
    /// No remote calls at all.
    pub local_only: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissingContent {
    pub id: String,
    pub path: String,
    /// The directory itself is gone, rather than just its content files.
    pub directory_missing: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissingMedia {
    pub hash: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DanglingReference {
    pub hash: String,
    pub conversation_id: String,
}

/// Full-body comparison for one conversation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParityMismatch {
    pub id: String,
    pub local_messages: usize,
    pub remote_messages: usize,
    pub local_media: usize,
    pub remote_media: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParityError {
    pub id: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ParityReport {
    pub checked: usize,
    pub mismatches: Vec<ParityMismatch>,
    pub permission_denied: Vec<String>,
    pub errors: Vec<ParityError>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub provider: String,
    pub local_entries: usize,
    pub media_entries: usize,
    /// Absent with `local_only`.
    pub status: Option<StatusReport>,
    pub missing_content: Vec<MissingContent>,
    pub missing_media: Vec<MissingMedia>,
    pub dangling_references: Vec<DanglingReference>,
    /// Present with `full`.
    pub parity: Option<ParityReport>,
}

impl VerifyReport {
    pub fn has_issues(&self) -> bool {
        let parity = self.parity.as_ref().is_some_and(|p| {
            !p.mismatches.is_empty() || !p.permission_denied.is_empty() || !p.errors.is_empty()
        });
        !self.missing_content.is_empty()
            || !self.missing_media.is_empty()
            || !self.dangling_references.is_empty()
            || self.status.as_ref().is_some_and(StatusReport::has_drift)
            || parity
    }
}

/// Check the local archive and, unless `local_only`, compare it with the remote.
///
/// `provider` may be `None` only with `local_only`.
pub async fn verify(
    provider: Option<&dyn Provider>,
    layout: &ArchiveLayout,
    opts: &VerifyOptions,
    config: &ReconcileConfig,
) -> Result<VerifyReport> {
    let index = ArchiveIndex::open(layout).await?;
    let registry = MediaRegistry::load(layout.registry_path()).await?;

    let mut report = VerifyReport {
        provider: layout.provider().to_string(),
        local_entries: index.len(),
        media_entries: registry.len(),
        ..VerifyReport::default()
    };
    report.missing_content = check_content(layout, &index).await?;
    let (missing_media, dangling) = check_media(&registry, &index).await?;
    report.missing_media = missing_media;
    report.dangling_references = dangling;

    if !opts.local_only {
        let provider = provider.ok_or_else(|| {
            Error::Config(format!(
                "remote verification of '{}' needs a provider",
                layout.provider()
            ))
        })?;
        let summaries = opts.list.apply(provider.list_conversations(&opts.list).await?);
        let status = compare(
            layout.provider(),
            &index,
            &summaries,
            config.tolerance_ms,
            opts.list.is_filtered(),
        );
        if opts.full {
            let ids: Vec<&str> = summaries
                .iter()
                .filter(|s| index.contains(&s.id))
                .map(|s| s.id.as_str())
                .collect();
            report.parity =
                Some(check_parity(provider, &index, &ids, config.parity_concurrency).await);
        }
        report.status = Some(status);
    }

    info!(
        provider = layout.provider(),
        missing_content = report.missing_content.len(),
        missing_media = report.missing_media.len(),
        dangling = report.dangling_references.len(),
        issues = report.has_issues(),
        "Verification finished"
    );
    Ok(report)
}

async fn check_content(layout: &ArchiveLayout, index: &ArchiveIndex) -> Result<Vec<MissingContent>> {
    let mut missing = Vec::new();
    for entry in index.entries().values() {
        let dir = layout.conversation_dir(&entry.path);
        if !tokio::fs::try_exists(&dir).await? {
            missing.push(MissingContent {
                id: entry.id.clone(),
                path: entry.path.clone(),
                directory_missing: true,
            });
            continue;
        }
        let mut has_content = false;
        for file in CONTENT_FILES {
            if tokio::fs::try_exists(dir.join(file)).await? {
                has_content = true;
                break;
            }
        }
        if !has_content {
            missing.push(MissingContent {
                id: entry.id.clone(),
                path: entry.path.clone(),
                directory_missing: false,
            });
        }
    }
    Ok(missing)
}

async fn check_media(
    registry: &MediaRegistry,
    index: &ArchiveIndex,
) -> Result<(Vec<MissingMedia>, Vec<DanglingReference>)> {
    let mut missing = Vec::new();
    let mut dangling = Vec::new();
    for (hash, entry) in registry.entries() {
        if !tokio::fs::try_exists(&entry.path).await? {
            missing.push(MissingMedia {
                hash: hash.clone(),
                path: entry.path.display().to_string(),
            });
        }
        let unique: BTreeSet<&String> = entry.references.iter().collect();
        for id in unique {
            if !index.contains(id) {
                dangling.push(DanglingReference {
                    hash: hash.clone(),
                    conversation_id: id.clone(),
                });
            }
        }
    }
    Ok((missing, dangling))
}

async fn check_parity(
    provider: &dyn Provider,
    index: &ArchiveIndex,
    ids: &[&str],
    concurrency: usize,
) -> ParityReport {
    let outcomes: Vec<(&str, Result<(usize, usize)>)> = futures::stream::iter(ids.iter().copied())
        .map(|id| async move {
            let outcome = provider
                .fetch_conversation(id)
                .await
                .map(|c| (c.message_count(), c.media_count()));
            (id, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = ParityReport {
        checked: outcomes.len(),
        ..ParityReport::default()
    };
    for (id, outcome) in outcomes {
        let Some(local) = index.get(id) else {
            continue;
        };
        match outcome {
            Ok((remote_messages, remote_media)) => {
                if remote_messages != local.message_count || remote_media != local.media_count {
                    report.mismatches.push(ParityMismatch {
                        id: id.to_string(),
                        local_messages: local.message_count,
                        remote_messages,
                        local_media: local.media_count,
                        remote_media,
                    });
                }
            }
            Err(err) if err.is_permission_denied() => {
                debug!(conversation_id = id, error = %err, "Parity fetch denied");
                report.permission_denied.push(id.to_string());
            }
            Err(err) => report.errors.push(ParityError {
                id: id.to_string(),
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
    report.mismatches.sort_by(|a, b| a.id.cmp(&b.id));
    report.permission_denied.sort();
    report.errors.sort_by(|a, b| a.id.cmp(&b.id));
    report
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
