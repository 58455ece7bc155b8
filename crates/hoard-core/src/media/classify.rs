//! Media categorization and file extension selection.
//!
//! Category resolution order: declared mime type, response content type, URL
//! extension, attachment kind. Extensions fall back to `.bin`.

use serde::{Deserialize, Serialize};

use crate::models::{Attachment, AttachmentKind};

/// Top-level media directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaCategory {
    pub const ALL: [MediaCategory; 4] = [
        MediaCategory::Image,
        MediaCategory::Video,
        MediaCategory::Audio,
        MediaCategory::Document,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            MediaCategory::Image => "images",
            MediaCategory::Video => "videos",
            MediaCategory::Audio => "audio",
            MediaCategory::Document => "documents",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime_essence(mime).to_ascii_lowercase();
        if essence.is_empty() || essence == "application/octet-stream" {
            return None;
        }
        Some(match essence.split('/').next() {
            Some("image") => MediaCategory::Image,
            Some("video") => MediaCategory::Video,
            Some("audio") => MediaCategory::Audio,
            _ => MediaCategory::Document,
        })
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "bmp" | "heic" | "avif" => {
                Some(MediaCategory::Image)
            }
            "mp4" | "webm" | "mov" | "mkv" | "avi" | "m4v" => Some(MediaCategory::Video),
            "mp3" | "wav" | "ogg" | "m4a" | "flac" | "aac" | "opus" => Some(MediaCategory::Audio),
            "pdf" | "txt" | "md" | "csv" | "json" | "doc" | "docx" | "xls" | "xlsx" | "ppt"
            | "pptx" | "html" | "zip" => Some(MediaCategory::Document),
            _ => None,
        }
    }
}

impl From<AttachmentKind> for MediaCategory {
    fn from(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Image => MediaCategory::Image,
            AttachmentKind::Video => MediaCategory::Video,
            AttachmentKind::Audio => MediaCategory::Audio,
            AttachmentKind::Document | AttachmentKind::Artifact | AttachmentKind::Code => {
                MediaCategory::Document
            }
        }
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Result of classifying one piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: MediaCategory,
    /// Includes the leading dot.
    pub extension: String,
    pub mime_type: Option<String>,
}

/// Classify an attachment given the content type the server reported.
pub fn classify(attachment: &Attachment, content_type: Option<&str>) -> Classification {
    let declared = attachment
        .mime_type
        .as_deref()
        .filter(|m| MediaCategory::from_mime(m).is_some());
    let served = content_type.filter(|m| MediaCategory::from_mime(m).is_some());
    let mime = declared.or(served);
    let url_ext = attachment
        .remote_url()
        .and_then(url_extension)
        .or_else(|| attachment.name.as_deref().and_then(url_extension));

    let category = mime
        .and_then(MediaCategory::from_mime)
        .or_else(|| url_ext.as_deref().and_then(MediaCategory::from_extension))
        .unwrap_or_else(|| attachment.kind.into());

    let extension = mime
        .and_then(extension_for_mime)
        .map(str::to_string)
        .or_else(|| url_ext.filter(|e| MediaCategory::from_extension(e).is_some()))
        .map_or_else(|| ".bin".to_string(), |e| format!(".{e}"));

    Classification {
        category,
        extension,
        mime_type: mime.map(|m| mime_essence(m).to_string()),
    }
}

fn mime_essence(mime: &str) -> &str {
    mime.split(';').next().unwrap_or("").trim()
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    Some(match mime_essence(mime).to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/heic" => "heic",
        "image/avif" => "avif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/webm" => "weba",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "text/csv" => "csv",
        "text/html" => "html",
        "application/json" => "json",
        "application/zip" => "zip",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        _ => return None,
    })
}

/// Lowercased extension of the last path segment, ignoring query and fragment.
fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
