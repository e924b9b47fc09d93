//! Link dereferencing.
//!
//! The resolver never performs I/O itself; it asks a [`LinkFetcher`] to turn
//! a URL into a JSON document.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`HttpFetcher`] | Real APIs over HTTP(S) |
//! | [`MemoryFetcher`] | Tests and fixtures; records every fetch |

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use crate::config::ResolverConfig;
use crate::error::FetchError;

/// Capability to dereference a URL into a JSON document.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared as
/// an `Arc<dyn LinkFetcher>` by every stream a resolver produces. Retry
/// policy, if any, belongs here rather than in the resolver.
#[async_trait]
pub trait LinkFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches documents with HTTP `GET`.
///
/// Holds a cloneable [`reqwest::Client`], which pools connections internally.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Wrap a pre-configured client (e.g. with a timeout).
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the timeout and user agent in `config`.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl LinkFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let parsed =
            url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(url.to_string(), e))?;

        debug!("fetch: GET {parsed}");
        let response = self
            .client
            .get(parsed)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        Ok(response.json::<Value>().await?)
    }
}

// ---------------------------------------------------------------------------
// MemoryFetcher
// ---------------------------------------------------------------------------

/// Serves documents from an in-memory map keyed by exact URL string.
///
/// Every call to [`fetch`](LinkFetcher::fetch) is recorded, hits and misses
/// alike, so tests can assert exactly which links a traversal dereferenced.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    documents: HashMap<String, Value>,
    log: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, url: impl Into<String>, document: Value) -> Self {
        self.insert(url, document);
        self
    }

    /// Serve `document` at `url`, replacing any earlier document.
    pub fn insert(&mut self, url: impl Into<String>, document: Value) {
        self.documents.insert(url.into(), document);
    }

    /// URLs fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Number of fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LinkFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(url.to_string());
        }
        debug!("fetch: memory {url}");
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
