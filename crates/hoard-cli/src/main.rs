//! hoard CLI - archive chat conversations with deduplicated media

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use hoard_core::config::ProviderConfig;
use hoard_core::media::MediaStats;
use hoard_core::provider::{ListOptions, Provider, ProviderRegistry};
use hoard_core::reconcile::{self, VerifyOptions};
use hoard_core::{ArchiveIndex, ArchiveLayout, ArchiveOptions, Archiver, Config, MediaStore};
use hoard_runtime::{AdapterProviderFactory, AdapterRunner};

mod pretty;

/// Exit code for a verify run that found drift or integrity problems.
const EXIT_ISSUES: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "hoard",
    author,
    version,
    about = "Archive chat conversations with deduplicated media",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print machine-readable JSON reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Archive new and updated conversations
    Archive {
        #[command(flatten)]
        window: WindowArgs,

        /// Only archive these conversation ids (repeatable)
        #[arg(long = "id", value_name = "ID")]
        ids: Vec<String>,

        /// Show what would be archived without fetching or writing
        #[arg(long)]
        dry_run: bool,

        /// Do not download attachments
        #[arg(long)]
        skip_media: bool,

        /// Leave already archived conversations alone
        #[arg(long)]
        skip_existing: bool,
    },

    /// Compare the remote listing with the local archive
    Status {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Check archive integrity and remote parity
    Verify {
        #[command(flatten)]
        window: WindowArgs,

        /// Fetch every archived conversation and compare counts
        #[arg(long)]
        full: bool,

        /// Only check local files, no remote calls
        #[arg(long, conflicts_with = "full")]
        local_only: bool,
    },

    /// Remove media no longer referenced by any archived conversation
    Gc {
        /// Only this provider
        #[arg(long)]
        provider: Option<String>,
    },

    /// Show archive and media statistics
    Stats {
        /// Only this provider
        #[arg(long)]
        provider: Option<String>,
    },

    /// List configured providers and their adapters
    Providers,
}

/// Provider and listing window shared by the remote-facing commands.
#[derive(Debug, Args)]
struct WindowArgs {
    /// Only this provider
    #[arg(long)]
    provider: Option<String>,

    /// Only conversations updated at or after this date
    #[arg(long)]
    since: Option<String>,

    /// Only conversations updated at or before this date
    #[arg(long)]
    until: Option<String>,

    /// Newest N conversations
    #[arg(long)]
    limit: Option<usize>,
}

impl WindowArgs {
    fn list_options(&self) -> Result<ListOptions> {
        Ok(ListOptions {
            since: self.since.as_deref().map(parse_date).transpose()?,
            until: self.until.as_deref().map(parse_date).transpose()?,
            limit: self.limit,
        })
    }
}

fn parse_date(input: &str) -> Result<DateTime<Utc>> {
    dateparser::parse(input).with_context(|| format!("Invalid date '{input}'"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let json = cli.json;
    match cli.command {
        Command::Archive {
            window,
            ids,
            dry_run,
            skip_media,
            skip_existing,
        } => {
            let opts = ArchiveOptions {
                list: window.list_options()?,
                ids: (!ids.is_empty()).then(|| ids.into_iter().collect::<HashSet<_>>()),
                skip_existing,
                dry_run,
                skip_media,
            };
            cmd_archive(&config, window.provider.as_deref(), &opts, json).await
        }
        Command::Status { window } => {
            let opts = window.list_options()?;
            cmd_status(&config, window.provider.as_deref(), &opts, json).await
        }
        Command::Verify {
            window,
            full,
            local_only,
        } => {
            let opts = VerifyOptions {
                list: window.list_options()?,
                full,
                local_only,
            };
            cmd_verify(&config, window.provider.as_deref(), &opts, json).await
        }
        Command::Gc { provider } => cmd_gc(&config, provider.as_deref(), json).await,
        Command::Stats { provider } => cmd_stats(&config, provider.as_deref(), json).await,
        Command::Providers => cmd_providers(&config, json),
    }
}

fn provider_registry(config: &Config) -> Result<ProviderRegistry> {
    let runner = Arc::new(AdapterRunner::from_config(config)?);
    let mut registry = ProviderRegistry::new();
    registry.register(Box::new(AdapterProviderFactory::new(runner)));
    Ok(registry)
}

async fn connect(
    registry: &ProviderRegistry,
    config: &ProviderConfig,
) -> hoard_core::Result<Box<dyn Provider>> {
    let provider = registry.create(config)?;
    provider.authenticate(config).await?;
    Ok(provider)
}

/// Authenticated providers for a pass.
///
/// A provider that fails setup is logged and skipped so the others still
/// run; the returned flag records that something failed.
async fn connect_all(
    config: &Config,
    filter: Option<&str>,
) -> Result<(Vec<Box<dyn Provider>>, bool)> {
    let selected = config.selected_providers(filter)?;
    if selected.is_empty() {
        warn!("No enabled providers configured");
        return Ok((Vec::new(), false));
    }
    let registry = provider_registry(config)?;

    let mut providers = Vec::new();
    let mut failed = false;
    for provider_config in selected {
        match connect(&registry, provider_config).await {
            Ok(provider) => providers.push(provider),
            Err(e) => {
                error!(provider = %provider_config.name, error = %e, "Provider setup failed");
                failed = true;
            }
        }
    }
    Ok((providers, failed))
}

async fn release(provider: &dyn Provider) {
    if let Err(e) = provider.cleanup().await {
        warn!(provider = provider.name(), error = %e, "Provider cleanup failed");
    }
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn cmd_archive(
    config: &Config,
    filter: Option<&str>,
    opts: &ArchiveOptions,
    json: bool,
) -> Result<ExitCode> {
    let (providers, mut failed) = connect_all(config, filter).await?;
    let mut reports = Vec::new();

    for provider in &providers {
        let pass = async {
            let archiver =
                Archiver::open(provider.as_ref(), &config.archive_dir, &config.media, false)
                    .await?;
            archiver.run(opts).await
        };
        let result = pass.await;
        release(provider.as_ref()).await;

        match result {
            Ok(report) => {
                if !json {
                    pretty::print_archive_report(&report);
                }
                reports.push(report);
            }
            Err(e) => {
                error!(provider = provider.name(), error = %e, "Archive pass failed");
                failed = true;
            }
        }
    }

    if json {
        pretty::print_json(&reports)?;
    }
    Ok(exit_code(failed))
}

/// Informational: always exits 0, failures are only logged.
async fn cmd_status(
    config: &Config,
    filter: Option<&str>,
    opts: &ListOptions,
    json: bool,
) -> Result<ExitCode> {
    let (providers, setup_failed) = connect_all(config, filter).await?;
    if setup_failed {
        warn!("Some providers could not be set up; their status is missing");
    }
    let mut reports = Vec::new();

    for provider in &providers {
        let layout = ArchiveLayout::new(&config.archive_dir, provider.name());
        let result =
            reconcile::status(provider.as_ref(), &layout, opts, config.reconcile.tolerance_ms)
                .await;
        release(provider.as_ref()).await;

        match result {
            Ok(report) => {
                if !json {
                    pretty::print_status_report(&report);
                }
                reports.push(report);
            }
            Err(e) => {
                error!(provider = provider.name(), error = %e, "Status failed");
            }
        }
    }

    if json {
        pretty::print_json(&reports)?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_verify(
    config: &Config,
    filter: Option<&str>,
    opts: &VerifyOptions,
    json: bool,
) -> Result<ExitCode> {
    let mut reports = Vec::new();
    let mut failed = false;

    if opts.local_only {
        for provider_config in config.selected_providers(filter)? {
            let layout = ArchiveLayout::new(&config.archive_dir, &provider_config.name);
            match reconcile::verify(None, &layout, opts, &config.reconcile).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(provider = %provider_config.name, error = %e, "Verify failed");
                    failed = true;
                }
            }
        }
    } else {
        let (providers, setup_failed) = connect_all(config, filter).await?;
        failed = setup_failed;
        for provider in &providers {
            let layout = ArchiveLayout::new(&config.archive_dir, provider.name());
            let result =
                reconcile::verify(Some(provider.as_ref()), &layout, opts, &config.reconcile).await;
            release(provider.as_ref()).await;
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(provider = provider.name(), error = %e, "Verify failed");
                    failed = true;
                }
            }
        }
    }

    if json {
        pretty::print_json(&reports)?;
    } else {
        for report in &reports {
            pretty::print_verify_report(report);
        }
    }

    let issues = reports.iter().filter(|r| r.has_issues()).count();
    if failed {
        return Ok(ExitCode::FAILURE);
    }
    if issues > 0 {
        info!(providers = issues, "Verify found issues");
        return Ok(ExitCode::from(EXIT_ISSUES));
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct GcSummary {
    provider: String,
    live_conversations: usize,
    #[serde(flatten)]
    result: hoard_core::media::GcResult,
}

async fn cmd_gc(config: &Config, filter: Option<&str>, json: bool) -> Result<ExitCode> {
    let mut summaries = Vec::new();
    for provider_config in config.selected_providers(filter)? {
        let layout = ArchiveLayout::new(&config.archive_dir, &provider_config.name);
        let index = ArchiveIndex::open(&layout).await?;
        let live = index.ids();
        let store = MediaStore::open(layout, &config.media, false).await?;
        let result = store.garbage_collect(&live).await?;
        info!(
            provider = %provider_config.name,
            removed = result.entries_removed,
            bytes = result.bytes_freed,
            "Garbage collection finished"
        );
        summaries.push(GcSummary {
            provider: provider_config.name.clone(),
            live_conversations: live.len(),
            result,
        });
    }

    if json {
        pretty::print_json(&summaries)?;
    } else {
        for summary in &summaries {
            pretty::print_gc_summary(summary);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct ProviderStats {
    provider: String,
    conversations: usize,
    messages: usize,
    media_references: usize,
    last_archived: Option<DateTime<Utc>>,
    media: MediaStats,
}

async fn cmd_stats(config: &Config, filter: Option<&str>, json: bool) -> Result<ExitCode> {
    let mut stats = Vec::new();
    for provider_config in config.selected_providers(filter)? {
        let layout = ArchiveLayout::new(&config.archive_dir, &provider_config.name);
        let index = ArchiveIndex::open(&layout).await?;
        let store = MediaStore::open(layout, &config.media, false).await?;
        let entries = index.entries().values();
        stats.push(ProviderStats {
            provider: provider_config.name.clone(),
            conversations: index.len(),
            messages: entries.clone().map(|e| e.message_count).sum(),
            media_references: entries.clone().map(|e| e.media_count).sum(),
            last_archived: entries.filter_map(|e| e.archived_at).max(),
            media: store.stats().await,
        });
    }

    if json {
        pretty::print_json(&stats)?;
    } else {
        for entry in &stats {
            pretty::print_provider_stats(entry);
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct ProviderRow {
    name: String,
    adapter: String,
    enabled: bool,
    rate_limit_sensitive: bool,
    adapter_path: Option<PathBuf>,
    strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProvidersOverview {
    archive_dir: PathBuf,
    runtime: Option<String>,
    providers: Vec<ProviderRow>,
}

fn cmd_providers(config: &Config, json: bool) -> Result<ExitCode> {
    let runner = match AdapterRunner::from_config(config) {
        Ok(runner) => Some(Arc::new(runner)),
        Err(e) => {
            warn!(error = %e, "Adapters cannot run");
            None
        }
    };
    let registry = runner.as_ref().map(|runner| {
        let mut registry = ProviderRegistry::new();
        registry.register(Box::new(AdapterProviderFactory::new(Arc::clone(runner))));
        registry
    });

    let providers = config
        .providers
        .iter()
        .map(|p| ProviderRow {
            name: p.name.clone(),
            adapter: p.adapter_name().to_string(),
            enabled: p.enabled,
            rate_limit_sensitive: p.rate_limit_sensitive,
            adapter_path: runner.as_ref().and_then(|r| r.find_adapter(p.adapter_name())),
            strategy: registry
                .as_ref()
                .and_then(|r| r.select(p))
                .map(|f| f.name().to_string()),
        })
        .collect();

    let overview = ProvidersOverview {
        archive_dir: config.archive_dir.clone(),
        runtime: runner.map(|r| r.runtime().binary().to_string()),
        providers,
    };

    if json {
        pretty::print_json(&overview)?;
    } else {
        pretty::print_providers(&overview);
    }
    Ok(ExitCode::SUCCESS)
}
