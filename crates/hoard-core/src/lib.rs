//! hoard-core: deduplicated, incrementally synced chat archives
//!
//! This crate provides the archive core: a content-addressed media store, a
//! per-provider JSON index, the archive pass that keeps both up to date, and
//! the status/verify engine that compares an archive with its remote source.
//! Remote platforms are reached through the [`provider::Provider`] trait.

pub mod archiver;
pub mod config;
pub mod error;
pub mod index;
pub mod media;
pub mod models;
pub mod paths;
pub mod provider;
pub mod reconcile;
pub mod render;
pub mod retry;

pub use archiver::{ArchiveOptions, ArchiveReport, Archiver};
pub use config::Config;
pub use error::Error;
pub use error::Result;
pub use index::ArchiveIndex;
pub use media::MediaStore;
pub use paths::ArchiveLayout;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "hoard";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "HOARD".to_string()
}
