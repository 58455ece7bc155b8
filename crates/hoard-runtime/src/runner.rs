//! Adapter runner - executes TypeScript provider adapters via a JS runtime.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;

use hoard_core::Config;

/// Requests above this size go through stdin instead of the environment.
const STDIN_THRESHOLD: usize = 100_000;

/// JavaScript runtime to use for adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Bun,
    Deno,
    Node,
}

impl Runtime {
    /// Get the binary name for this runtime.
    pub fn binary(&self) -> &'static str {
        match self {
            Runtime::Bun => "bun",
            Runtime::Deno => "deno",
            Runtime::Node => "node",
        }
    }

    /// Get the run flag for this runtime.
    pub fn run_args(&self) -> Vec<&'static str> {
        match self {
            Runtime::Bun => vec!["run"],
            Runtime::Deno => vec!["run", "--allow-read", "--allow-env", "--allow-net"],
            Runtime::Node => vec!["--experimental-strip-types"],
        }
    }

    /// Detect the best available runtime on `PATH`.
    pub fn detect() -> Option<Self> {
        [Runtime::Bun, Runtime::Deno, Runtime::Node]
            .into_iter()
            .find(|runtime| which::which(runtime.binary()).is_ok())
    }

    /// Parse runtime from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bun" => Some(Runtime::Bun),
            "deno" => Some(Runtime::Deno),
            "node" => Some(Runtime::Node),
            "auto" => Self::detect(),
            _ => None,
        }
    }
}

impl std::str::FromStr for Runtime {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Runtime::parse(s).ok_or(())
    }
}

/// Adapter metadata returned from adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    #[serde(default)]
    pub rate_limit_sensitive: bool,
}

/// Request sent to adapter.
#[derive(Debug, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum AdapterRequest {
    Info,
    Authenticate {
        settings: serde_json::Map<String, serde_json::Value>,
    },
    List {
        opts: ListParams,
    },
    Fetch {
        id: String,
    },
    ResolveMedia {
        conversation_id: String,
        attachment_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Cleanup,
}

impl AdapterRequest {
    pub fn method(&self) -> &'static str {
        match self {
            AdapterRequest::Info => "info",
            AdapterRequest::Authenticate { .. } => "authenticate",
            AdapterRequest::List { .. } => "list",
            AdapterRequest::Fetch { .. } => "fetch",
            AdapterRequest::ResolveMedia { .. } => "resolveMedia",
            AdapterRequest::Cleanup => "cleanup",
        }
    }
}

/// Listing filters as unix milliseconds.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Error reply: `{"error": "...", "kind": "auth"}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("Adapter error ({kind}): {error}")]
pub struct AdapterFailure {
    pub error: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "provider".to_string()
}

/// Parse adapter stdout: either an error reply or the method payload.
pub fn parse_reply<T: DeserializeOwned>(stdout: &str) -> anyhow::Result<T> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())
        .map_err(|e| anyhow::anyhow!("Adapter returned invalid JSON: {e}"))?;
    if let Some(object) = value.as_object()
        && object.get("error").is_some_and(serde_json::Value::is_string)
    {
        let failure: AdapterFailure = serde_json::from_value(value)?;
        return Err(failure.into());
    }
    serde_json::from_value(value).map_err(|e| anyhow::anyhow!("Unexpected adapter reply: {e}"))
}

/// Runner for TypeScript adapters.
#[derive(Debug, Clone)]
pub struct AdapterRunner {
    runtime: Runtime,
    adapter_paths: Vec<PathBuf>,
}

impl AdapterRunner {
    /// Create a new adapter runner.
    pub fn new(runtime: Runtime, adapter_paths: Vec<PathBuf>) -> Self {
        Self {
            runtime,
            adapter_paths,
        }
    }

    /// Runner for the configured runtime preference and adapter paths.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let runtime = Runtime::parse(&config.js_runtime).ok_or_else(|| {
            anyhow::anyhow!(
                "No JavaScript runtime available for '{}' (install bun, deno or node)",
                config.js_runtime
            )
        })?;
        Ok(Self::new(runtime, config.adapter_paths.clone()))
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Find an adapter by name.
    pub fn find_adapter(&self, name: &str) -> Option<PathBuf> {
        self.adapter_paths
            .iter()
            .map(|base| base.join(name).join("adapter.ts"))
            .find(|file| file.exists())
    }

    /// List available adapters.
    pub fn list_adapters(&self) -> Vec<String> {
        let mut adapters = Vec::new();
        for base_path in &self.adapter_paths {
            if let Ok(entries) = std::fs::read_dir(base_path) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.join("adapter.ts").exists()
                        && let Some(name) = path.file_name().and_then(|n| n.to_str())
                    {
                        adapters.push(name.to_string());
                    }
                }
            }
        }
        adapters.sort();
        adapters.dedup();
        adapters
    }

    /// Call an adapter method and decode its reply.
    ///
    /// `session` is whatever the adapter returned from `authenticate`; it is
    /// handed back on every later call in `HOARD_SESSION`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        adapter_path: &Path,
        request: &AdapterRequest,
        session: Option<&serde_json::Value>,
    ) -> anyhow::Result<T> {
        use tokio::io::AsyncWriteExt;

        let request_json = serde_json::to_string(request)?;
        let mut args: Vec<String> = self
            .runtime
            .run_args()
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        args.push(adapter_path.display().to_string());

        let use_stdin = request_json.len() > STDIN_THRESHOLD;

        let mut cmd = AsyncCommand::new(self.runtime.binary());
        cmd.args(&args);
        if use_stdin {
            cmd.env("HOARD_REQUEST_STDIN", "1");
            cmd.stdin(std::process::Stdio::piped());
        } else {
            cmd.env("HOARD_REQUEST", &request_json);
        }
        if let Some(session) = session {
            cmd.env("HOARD_SESSION", serde_json::to_string(session)?);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        tracing::debug!(
            adapter = %adapter_path.display(),
            method = request.method(),
            stdin = use_stdin,
            "Calling adapter"
        );
        let mut child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!("Failed to start {}: {e}", self.runtime.binary())
        })?;

        if use_stdin && let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request_json.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8(output.stdout)?;

        if !output.status.success() {
            // Adapters may still print a structured error before exiting non-zero.
            if let Err(err) = parse_reply::<serde_json::Value>(&stdout)
                && err.downcast_ref::<AdapterFailure>().is_some()
            {
                return Err(err);
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Adapter failed: {}", stderr.trim());
        }

        parse_reply(&stdout)
    }

    /// Get adapter info.
    pub async fn get_info(&self, adapter_path: &Path) -> anyhow::Result<AdapterInfo> {
        self.call(adapter_path, &AdapterRequest::Info, None).await
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
