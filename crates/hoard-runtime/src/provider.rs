//! `Provider` implementation backed by a TypeScript adapter.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use hoard_core::config::ProviderConfig;
use hoard_core::models::{Attachment, Conversation, ConversationSummary};
use hoard_core::provider::{ListOptions, Provider, ProviderFactory};
use hoard_core::{Error, Result};

use crate::runner::{AdapterFailure, AdapterRequest, AdapterRunner, ListParams};
use crate::wire::{AuthReply, ResolvedMedia, WireConversation, WireSummary, to_millis};

/// Map an adapter call failure onto the core error taxonomy.
pub fn to_core_error(err: &anyhow::Error) -> Error {
    let Some(failure) = err.downcast_ref::<AdapterFailure>() else {
        return Error::Provider(format!("{err:#}"));
    };
    let message = failure.error.clone();
    match failure.kind.as_str() {
        "auth" => Error::Auth(message),
        "permission" => Error::Permission(message),
        "not_found" => Error::NotFound(message),
        "rate_limited" => Error::RateLimited(message),
        "timeout" => Error::Timeout(message),
        "network" => Error::Network(message),
        _ => Error::Provider(message),
    }
}

#[derive(Debug, Default)]
struct Session {
    authenticated: bool,
    cookies: Option<String>,
    state: Option<serde_json::Value>,
}

/// One configured provider served by an adapter script.
pub struct AdapterProvider {
    name: String,
    runner: Arc<AdapterRunner>,
    adapter_path: PathBuf,
    rate_limit_sensitive: bool,
    session: RwLock<Session>,
}

impl AdapterProvider {
    pub fn new(
        name: impl Into<String>,
        runner: Arc<AdapterRunner>,
        adapter_path: PathBuf,
        rate_limit_sensitive: bool,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            adapter_path,
            rate_limit_sensitive,
            session: RwLock::new(Session::default()),
        }
    }

    pub fn adapter_path(&self) -> &std::path::Path {
        &self.adapter_path
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, request: AdapterRequest) -> Result<T> {
        let state = self.session.read().await.state.clone();
        self.runner
            .call(&self.adapter_path, &request, state.as_ref())
            .await
            .map_err(|e| {
                tracing::debug!(provider = %self.name, method = request.method(), error = %e, "Adapter call failed");
                to_core_error(&e)
            })
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        if self.session.read().await.authenticated {
            Ok(())
        } else {
            Err(Error::Auth(format!("{} is not authenticated", self.name)))
        }
    }
}

#[async_trait]
impl Provider for AdapterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_sensitive(&self) -> bool {
        self.rate_limit_sensitive
    }

    async fn authenticate(&self, config: &ProviderConfig) -> Result<()> {
        let reply: AuthReply = self
            .call(AdapterRequest::Authenticate {
                settings: config.settings.clone(),
            })
            .await?;
        if !reply.authenticated {
            return Err(Error::Auth(format!(
                "adapter '{}' rejected the configured credentials",
                config.adapter_name()
            )));
        }
        let mut session = self.session.write().await;
        session.authenticated = true;
        session.cookies = reply.cookies;
        session.state = reply.session;
        tracing::info!(provider = %self.name, "Authenticated");
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.session.read().await.authenticated
    }

    async fn list_conversations(&self, opts: &ListOptions) -> Result<Vec<ConversationSummary>> {
        self.ensure_authenticated().await?;
        let params = ListParams {
            since: opts.since.map(to_millis),
            until: opts.until.map(to_millis),
            limit: opts.limit,
        };
        let summaries: Vec<WireSummary> = self.call(AdapterRequest::List { opts: params }).await?;
        Ok(summaries.into_iter().map(Into::into).collect())
    }

    async fn fetch_conversation(&self, id: &str) -> Result<Conversation> {
        self.ensure_authenticated().await?;
        let conversation: WireConversation = self
            .call(AdapterRequest::Fetch { id: id.to_string() })
            .await?;
        Ok(conversation.into())
    }

    async fn download_cookies(&self) -> Option<String> {
        self.session.read().await.cookies.clone()
    }

    async fn resolve_media_url(
        &self,
        conversation_id: &str,
        attachment: &Attachment,
    ) -> Result<Option<String>> {
        let resolved: ResolvedMedia = self
            .call(AdapterRequest::ResolveMedia {
                conversation_id: conversation_id.to_string(),
                attachment_id: attachment.id.clone(),
                url: attachment.url.clone(),
            })
            .await?;
        Ok(resolved.url.filter(|u| !u.trim().is_empty()))
    }

    async fn cleanup(&self) -> Result<()> {
        if !self.is_authenticated().await {
            return Ok(());
        }
        let _: serde_json::Value = self.call(AdapterRequest::Cleanup).await?;
        let mut session = self.session.write().await;
        *session = Session::default();
        Ok(())
    }
}

/// Serves any provider whose adapter script can be found.
pub struct AdapterProviderFactory {
    runner: Arc<AdapterRunner>,
}

impl AdapterProviderFactory {
    pub fn new(runner: Arc<AdapterRunner>) -> Self {
        Self { runner }
    }
}

impl ProviderFactory for AdapterProviderFactory {
    fn name(&self) -> &str {
        "adapter"
    }

    fn supports(&self, config: &ProviderConfig) -> bool {
        self.runner.find_adapter(config.adapter_name()).is_some()
    }

    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>> {
        let path = self.runner.find_adapter(config.adapter_name()).ok_or_else(|| {
            Error::Config(format!(
                "adapter '{}' not found for provider '{}'",
                config.adapter_name(),
                config.name
            ))
        })?;
        Ok(Box::new(AdapterProvider::new(
            config.name.clone(),
            Arc::clone(&self.runner),
            path,
            config.rate_limit_sensitive,
        )))
    }
}
