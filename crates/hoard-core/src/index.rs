//! Per-provider archive index: conversation id -> storage path and sync metadata.
//!
//! Backed by a single JSON object (`<baseDir>/<provider>/index.json`) that is
//! loaded fully on open and rewritten fully on every mutation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Conversation, Hierarchy};
use crate::paths::ArchiveLayout;

/// One archived conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    /// Relative to the provider directory.
    pub path: String,
    #[serde(default)]
    pub title: String,
    /// Remote `updated_at` of the revision that was archived.
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub media_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// Wall-clock time of the last write; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl IndexEntry {
    /// Build an entry for a fully written conversation.
    pub fn for_conversation(conversation: &Conversation, path: impl Into<String>) -> Self {
        let Hierarchy {
            workspace,
            project,
            folder,
        } = conversation.hierarchy.clone();
        Self {
            id: conversation.id.clone(),
            path: path.into(),
            title: conversation.title.clone(),
            updated_at: conversation.updated_at,
            message_count: conversation.message_count(),
            media_count: conversation.media_count(),
            workspace,
            project,
            folder,
            archived_at: Some(Utc::now()),
        }
    }
}

/// In-memory view of one provider's index file.
#[derive(Debug)]
pub struct ArchiveIndex {
    path: PathBuf,
    entries: BTreeMap<String, IndexEntry>,
}

impl ArchiveIndex {
    /// Open the index for the layout's provider; a missing file is an empty index.
    pub async fn open(layout: &ArchiveLayout) -> Result<Self> {
        Self::open_at(layout.index_path()).await
    }

    pub async fn open_at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened archive index");
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only snapshot of every entry.
    pub fn entries(&self) -> &BTreeMap<String, IndexEntry> {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every archived conversation.
    pub fn ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Insert or replace one entry and persist the whole index.
    pub async fn upsert(&mut self, id: &str, entry: IndexEntry) -> Result<()> {
        self.entries.insert(id.to_string(), entry);
        self.save().await
    }

    /// Remove an entry and persist. Never called by an archive pass.
    pub async fn remove(&mut self, id: &str) -> Result<Option<IndexEntry>> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    async fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.entries).await
    }
}

/// Serialize to a sibling temp file, then rename over the target.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
