//! Media registry: content hash -> stored file and referencing conversations.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::MediaCategory;
use crate::error::Result;
use crate::index::write_json_atomic;

/// One unique piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub path: PathBuf,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub category: MediaCategory,
    pub first_seen: DateTime<Utc>,
    /// Conversation ids, in first-reference order, without duplicates.
    pub references: Vec<String>,
}

impl RegistryEntry {
    /// Returns false when the id was already present.
    pub fn add_reference(&mut self, conversation_id: &str) -> bool {
        if self.references.iter().any(|r| r == conversation_id) {
            return false;
        }
        self.references.push(conversation_id.to_string());
        true
    }
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MediaStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub total_references: usize,
    /// Bytes not stored twice thanks to reuse.
    pub dedup_savings: u64,
    pub by_category: BTreeMap<MediaCategory, CategoryStats>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CategoryStats {
    pub files: usize,
    pub bytes: u64,
}

/// In-memory registry with a dirty flag so unchanged registries are not rewritten.
#[derive(Debug)]
pub struct MediaRegistry {
    path: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
    dirty: bool,
}

impl MediaRegistry {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &BTreeMap<String, RegistryEntry> {
        &self.entries
    }

    pub fn get(&self, hash: &str) -> Option<&RegistryEntry> {
        self.entries.get(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record another reference to existing content. Returns the entry on a hit.
    pub fn reference(&mut self, hash: &str, conversation_id: &str) -> Option<&RegistryEntry> {
        let entry = self.entries.get_mut(hash)?;
        if entry.add_reference(conversation_id) {
            self.dirty = true;
        }
        Some(entry)
    }

    pub fn insert(&mut self, hash: String, entry: RegistryEntry) {
        self.entries.insert(hash, entry);
        self.dirty = true;
    }

    /// Narrow every reference list to `live` ids and drop entries left with none.
    pub fn retain_live(&mut self, live: &HashSet<String>) -> Vec<(String, RegistryEntry)> {
        let mut orphaned = Vec::new();
        let hashes: Vec<String> = self.entries.keys().cloned().collect();
        for hash in hashes {
            let Some(entry) = self.entries.get_mut(&hash) else {
                continue;
            };
            let before = entry.references.len();
            entry.references.retain(|id| live.contains(id));
            if entry.references.is_empty() {
                if let Some(removed) = self.entries.remove(&hash) {
                    orphaned.push((hash, removed));
                }
                self.dirty = true;
            } else if entry.references.len() != before {
                self.dirty = true;
            }
        }
        orphaned
    }

    /// Σ size × (references − 1)
    pub fn dedup_savings(&self) -> u64 {
        self.entries
            .values()
            .map(|e| e.size * (e.references.len().saturating_sub(1)) as u64)
            .sum()
    }

    pub fn stats(&self) -> MediaStats {
        let mut stats = MediaStats {
            entries: self.entries.len(),
            dedup_savings: self.dedup_savings(),
            ..MediaStats::default()
        };
        for entry in self.entries.values() {
            stats.total_bytes += entry.size;
            stats.total_references += entry.references.len();
            let category = stats.by_category.entry(entry.category).or_default();
            category.files += 1;
            category.bytes += entry.size;
        }
        stats
    }

    /// Persist when changed since the last load/save. Returns whether a write happened.
    pub async fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        write_json_atomic(&self.path, &self.entries).await?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "Saved media registry");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: u64, refs: &[&str]) -> RegistryEntry {
        RegistryEntry {
            path: PathBuf::from("/m/x.bin"),
            size,
            mime_type: None,
            category: MediaCategory::Document,
            first_seen: Utc::now(),
            references: refs.iter().map(|r| (*r).to_string()).collect(),
        }
    }

    fn registry_in(dir: &Path) -> MediaRegistry {
        MediaRegistry {
            path: dir.join("media-registry.json"),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    #[test]
    fn add_reference_is_idempotent() {
        let mut e = entry(1, &["a"]);
        assert!(!e.add_reference("a"));
        assert!(e.add_reference("b"));
        assert_eq!(e.references, vec!["a", "b"]);
    }

    #[test]
    fn dedup_savings_matches_formula() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = registry_in(dir.path());
        // N = 3 blobs of 100 bytes, each referenced R = 4 times.
        for n in 0..3 {
            registry.insert(format!("h{n}"), entry(100, &["a", "b", "c", "d"]));
        }
        assert_eq!(registry.dedup_savings(), 100 * 3 * (4 - 1));

        registry.insert("single".to_string(), entry(50, &["a"]));
        assert_eq!(registry.dedup_savings(), 900);
    }

    #[test]
    fn retain_live_narrows_and_drops() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = registry_in(dir.path());
        registry.insert("keep".to_string(), entry(10, &["a", "gone"]));
        registry.insert("drop".to_string(), entry(20, &["gone"]));

        let live: HashSet<String> = ["a".to_string()].into_iter().collect();
        let orphaned = registry.retain_live(&live);

        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].0, "drop");
        assert_eq!(registry.get("keep").map(|e| e.references.clone()), Some(vec!["a".to_string()]));
        assert!(registry.get("drop").is_none());
    }

    #[test]
    fn stats_by_category() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = registry_in(dir.path());
        let mut image = entry(30, &["a", "b"]);
        image.category = MediaCategory::Image;
        registry.insert("i".to_string(), image);
        registry.insert("d".to_string(), entry(5, &["a"]));

        let stats = registry.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_bytes, 35);
        assert_eq!(stats.total_references, 3);
        assert_eq!(stats.dedup_savings, 30);
        assert_eq!(
            stats.by_category.get(&MediaCategory::Image),
            Some(&CategoryStats { files: 1, bytes: 30 })
        );
    }

    #[tokio::test]
    async fn save_only_when_dirty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("media-registry.json");
        let mut registry = MediaRegistry::load(&path).await.expect("load");
        assert!(!registry.save().await.expect("save clean"));
        assert!(!path.exists());

        registry.insert("h".to_string(), entry(3, &["a"]));
        assert!(registry.save().await.expect("save dirty"));
        assert!(!registry.is_dirty());

        let reloaded = MediaRegistry::load(&path).await.expect("reload");
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("h").map(|e| e.size), Some(3));
    }

    #[tokio::test]
    async fn repeated_reference_does_not_dirty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = registry_in(dir.path());
        registry.insert("h".to_string(), entry(3, &["a"]));
        registry.save().await.expect("save");

        assert!(registry.reference("h", "a").is_some());
        assert!(!registry.is_dirty());
        assert!(registry.reference("h", "b").is_some());
        assert!(registry.is_dirty());
        assert!(registry.reference("missing", "a").is_none());
    }
}
