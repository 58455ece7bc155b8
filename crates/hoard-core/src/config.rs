//! Configuration types and loading for hoard.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the archive.
    pub archive_dir: PathBuf,

    /// Adapter directories to search for provider adapters.
    pub adapter_paths: Vec<PathBuf>,

    /// JavaScript runtime preference: "bun", "deno", "node", or "auto".
    pub js_runtime: String,

    /// Media download settings.
    pub media: MediaConfig,

    /// Status/verify settings.
    pub reconcile: ReconcileConfig,

    /// Configured providers.
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        let mut adapter_paths = vec![config_dir.join("adapters")];

        // Bundled distribution: exe_dir/adapters
        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let bundled_adapters = exe_dir.join("adapters");
            if bundled_adapters.exists() {
                adapter_paths.push(bundled_adapters);
            }
        }

        Self {
            archive_dir: data_dir.join("archive"),
            adapter_paths,
            js_runtime: "auto".to_string(),
            media: MediaConfig::default(),
            reconcile: ReconcileConfig::default(),
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_config_path())
    }

    /// Load configuration from a specific file, layering `HOARD_*`
    /// environment overrides on top. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(&crate::env_prefix())
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            config.expand_paths();
            config.save_to_path(path)?;
        }
        Self::load_from_path(path)
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.archive_dir = Self::expand_path(&self.archive_dir.to_string_lossy());
        self.adapter_paths = self
            .adapter_paths
            .iter()
            .map(|p| Self::expand_path(&p.to_string_lossy()))
            .collect();
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(Error::Config("provider entry without a name".to_string()));
            }
            if provider
                .name
                .chars()
                .any(|c| matches!(c, '/' | '\\') || c.is_control())
            {
                return Err(Error::Config(format!(
                    "provider name '{}' must be usable as a directory name",
                    provider.name
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "provider '{}' is configured twice",
                    provider.name
                )));
            }
        }
        if self.media.concurrency == Some(0) {
            return Err(Error::Config(
                "media.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a provider by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Providers selected by an optional name filter.
    ///
    /// With a filter the provider must exist (enabled or not); without one
    /// every enabled provider is returned.
    pub fn selected_providers(&self, filter: Option<&str>) -> Result<Vec<&ProviderConfig>> {
        match filter {
            Some(name) => self
                .provider(name)
                .map(|p| vec![p])
                .ok_or_else(|| Error::Config(format!("provider '{name}' is not configured"))),
            None => Ok(self.providers.iter().filter(|p| p.enabled).collect()),
        }
    }
}

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; also the archive subdirectory.
    pub name: String,

    /// Adapter implementing this provider. Defaults to the provider name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Whether this provider takes part in passes without `--provider`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Force sequential media downloads with a fixed delay.
    #[serde(default)]
    pub rate_limit_sensitive: bool,

    /// Free-form settings handed to the adapter on authenticate.
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: None,
            enabled: true,
            rate_limit_sensitive: false,
            settings: serde_json::Map::new(),
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.name)
    }
}

/// Media download configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Parallel downloads; derived from the core count when unset.
    pub concurrency: Option<usize>,

    /// First 429 backoff step in milliseconds; doubles on each retry.
    pub retry_base_delay_ms: u64,

    /// Retries after the first attempt for rate-limited downloads.
    pub max_retries: u32,

    /// Pause between downloads for rate-limit-sensitive providers.
    pub sequential_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Platform-private URL schemes that cannot be downloaded.
    pub unsupported_prefixes: Vec<String>,

    /// Substrings identifying expiring signed asset URLs.
    pub expiring_url_patterns: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            retry_base_delay_ms: 5_000,
            max_retries: 3,
            sequential_delay_ms: 500,
            request_timeout_secs: 120,
            unsupported_prefixes: vec!["sediment://".to_string(), "file-service://".to_string()],
            expiring_url_patterns: vec![
                "oaiusercontent.com".to_string(),
                "X-Amz-Signature=".to_string(),
            ],
        }
    }
}

impl MediaConfig {
    /// Effective concurrency for a provider.
    pub fn effective_concurrency(&self, rate_limit_sensitive: bool) -> usize {
        if rate_limit_sensitive {
            return 1;
        }
        self.concurrency.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism().map_or(2, |n| n.get());
            default_concurrency(cores)
        })
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn sequential_delay(&self) -> Duration {
        Duration::from_millis(self.sequential_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `clamp(floor(cores / 2), 2, 5)`
pub fn default_concurrency(cores: usize) -> usize {
    (cores / 2).clamp(2, 5)
}

/// Reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Remote timestamps within this window of the local one count as equal.
    pub tolerance_ms: i64,

    /// Concurrent full-body fetches during `verify --full`.
    pub parity_concurrency: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: crate::reconcile::DEFAULT_TOLERANCE_MS,
            parity_concurrency: 2,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
