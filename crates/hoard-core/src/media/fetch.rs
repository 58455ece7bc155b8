//! Streaming HTTP fetch for media downloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};

use super::temp::TempDownload;
use crate::error::{Error, Result};

/// Pulls a remote URL into a temp file.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Stream `url` into `sink`. Returns the served `Content-Type`, if any.
    ///
    /// Non-success statuses must surface as [`Error::HttpStatus`] so the
    /// caller can tell rate limiting and expired links apart.
    async fn fetch(
        &self,
        url: &str,
        cookies: Option<&str>,
        sink: &mut TempDownload,
    ) -> Result<Option<String>>;
}

/// [`MediaFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        cookies: Option<&str>,
        sink: &mut TempDownload,
    ) -> Result<Option<String>> {
        let mut request = self.client.get(url);
        if let Some(cookies) = cookies.filter(|c| !c.is_empty()) {
            request = request.header(COOKIE, cookies);
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        while let Some(chunk) = response.chunk().await? {
            sink.write(&chunk).await?;
        }
        tracing::trace!(url, bytes = sink.size(), "Fetched media");
        Ok(content_type)
    }
}
