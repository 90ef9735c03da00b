//! Fetching specifications over HTTP.

use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{Result, RetrievalError};

/// Downloads raw specification documents with a bounded timeout and size.
#[derive(Debug, Clone)]
pub struct SpecFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl SpecFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RetrievalError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Fetch `url`, returning the body bytes.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)
            .map_err(|e| RetrievalError::InvalidRequest(format!("invalid URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RetrievalError::InvalidRequest(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        debug!(%url, "fetching specification");
        let mut response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalError::Fetch(format!("timed out fetching {url}"))
            } else {
                RetrievalError::Fetch(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Fetch(format!("{url} returned HTTP {status}")));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_body_bytes as u64 {
                return Err(self.oversize(url));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RetrievalError::Fetch(format!("reading body from {url} failed: {e}")))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.oversize(url));
            }
            body.extend_from_slice(&chunk);
        }

        info!(%url, bytes = body.len(), "fetched specification");
        Ok(body)
    }

    fn oversize(&self, url: &str) -> RetrievalError {
        RetrievalError::Fetch(format!(
            "{url} exceeds the {} byte limit",
            self.max_body_bytes
        ))
    }
}
