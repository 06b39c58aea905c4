//! Fetching external calendar feeds.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

/// Source of raw feed payloads. The reconciler only sees this trait so tests
/// and alternative transports can stand in for HTTP.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the feed at `url` and return its body.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches `http(s)://` and `webcal://` feeds with reqwest, and `file://`
/// feeds from local disk. Every fetch is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| EngineError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn fetch_http(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                EngineError::ExternalFetch(format!("{} timed out after {:?}", url, self.timeout))
            } else {
                EngineError::ExternalFetch(format!("{}: {}", url, e))
            }
        })?;
        let response = response
            .error_for_status()
            .map_err(|e| EngineError::ExternalFetch(format!("{}: {}", url, e)))?;
        response
            .text()
            .await
            .map_err(|e| EngineError::ExternalFetch(format!("{}: reading body: {}", url, e)))
    }

    async fn fetch_file(&self, path: &str) -> Result<String> {
        tokio::time::timeout(self.timeout, tokio::fs::read_to_string(path))
            .await
            .map_err(|_| {
                EngineError::ExternalFetch(format!("{} timed out after {:?}", path, self.timeout))
            })?
            .map_err(|e| EngineError::ExternalFetch(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl FeedFetcher for FeedClient {
    async fn fetch(&self, url: &str) -> Result<String> {
        if let Some(rest) = url.strip_prefix("webcal://") {
            return self.fetch_http(&format!("https://{}", rest)).await;
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return self.fetch_http(url).await;
        }
        if let Some(path) = url.strip_prefix("file://") {
            return self.fetch_file(path).await;
        }
        Err(EngineError::ExternalFetch(format!(
            "unsupported feed URL scheme: {}",
            url
        )))
    }
}
