//! On-disk layout of an archive directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::Digest;

use crate::media::MediaCategory;

pub const INDEX_FILE: &str = "index.json";
pub const REGISTRY_FILE: &str = "media-registry.json";
pub const CONVERSATION_JSON: &str = "conversation.json";
pub const CONVERSATION_MARKDOWN: &str = "conversation.md";
pub const CONVERSATION_JSON_GZ: &str = "conversation.json.gz";
pub const TEMP_DIR: &str = ".temp";
pub const MEDIA_DIR: &str = "media";

/// Files that count as archived conversation content.
pub const CONTENT_FILES: [&str; 3] = [CONVERSATION_JSON, CONVERSATION_MARKDOWN, CONVERSATION_JSON_GZ];

/// Paths for one provider inside an archive root.
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    base_dir: PathBuf,
    provider: String,
}

impl ArchiveLayout {
    pub fn new(base_dir: impl Into<PathBuf>, provider: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            provider: provider.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// `<baseDir>/<provider>`
    pub fn provider_dir(&self) -> PathBuf {
        self.base_dir.join(&self.provider)
    }

    pub fn index_path(&self) -> PathBuf {
        self.provider_dir().join(INDEX_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.provider_dir().join(REGISTRY_FILE)
    }

    /// Shared across providers: `<baseDir>/.temp`
    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join(TEMP_DIR)
    }

    pub fn media_dir(&self, category: MediaCategory) -> PathBuf {
        self.provider_dir().join(MEDIA_DIR).join(category.dir_name())
    }

    /// Absolute directory for a conversation's relative storage path.
    pub fn conversation_dir(&self, relative: &str) -> PathBuf {
        self.provider_dir().join(relative)
    }
}

/// Relative storage path for a conversation that has none yet.
///
/// `<hierarchy labels...>/<yyyy-mm-dd>_<title slug>_<id>`
pub fn conversation_path(
    id: &str,
    title: &str,
    created_at: DateTime<Utc>,
    hierarchy_labels: &[&str],
) -> String {
    let mut segments: Vec<String> = hierarchy_labels
        .iter()
        .map(|label| sanitize_segment(label, 60))
        .filter(|s| !s.is_empty())
        .collect();

    let slug = sanitize_segment(title, 50);
    let slug = if slug.is_empty() { "untitled".to_string() } else { slug };
    let mut safe_id = sanitize_segment(id, 80);
    if safe_id.is_empty() {
        // Non-ASCII ids still need a stable, unique segment.
        let digest = sha2::Sha256::digest(id.as_bytes());
        safe_id = hex::encode(&digest[..8]);
    }
    segments.push(format!(
        "{}_{}_{}",
        created_at.format("%Y-%m-%d"),
        slug,
        safe_id
    ));
    segments.join("/")
}

/// Lowercase, ASCII alphanumerics and dashes only, trimmed to `max_len`.
pub fn sanitize_segment(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len));
    let mut last_dash = true;
    for c in raw.chars() {
        if out.len() >= max_len {
            break;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
