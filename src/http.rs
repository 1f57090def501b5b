//! HTTP fetch layer shared by the source adapters, the CSW client and the
//! service probe.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::redirect::Policy;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::FetchError;

/// A response body together with the URL it was finally served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub body: String,
    /// The URL after redirects. Relative links in the body resolve against it.
    pub final_url: String,
}

/// Thin wrapper over a shared [`reqwest::Client`] with a per-request timeout.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs), &config.user_agent)
    }

    /// The same client with a different request timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            client: self.client.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url`, failing on transport errors and non-success statuses.
    pub async fn get_content(&self, url: &str) -> Result<FetchedContent, FetchError> {
        debug!(url = %url, timeout_secs = self.timeout.as_secs(), "HTTP fetch starting");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;
        debug!(url = %url, final_url = %final_url, bytes = body.len(), "HTTP fetch complete");

        Ok(FetchedContent { body, final_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_a_connection_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2), "test").unwrap();
        let err = fetcher.get_content("not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::Connection { .. }));
        assert!(err
            .to_string()
            .starts_with("URL syntax error or could not make connection to the host server."));
    }

    #[test]
    fn with_timeout_keeps_client() {
        let fetcher = HttpFetcher::new(Duration::from_secs(30), "test").unwrap();
        let short = fetcher.with_timeout(Duration::from_secs(10));
        assert_eq!(short.timeout(), Duration::from_secs(10));
        assert_eq!(fetcher.timeout(), Duration::from_secs(30));
    }
}
