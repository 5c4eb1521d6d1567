pub mod pacing;
pub mod retry;

pub use pacing::Pacer;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::FetchError;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120 Safari/537.36";

/// Retrieves raw documents from the scraped source.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// HTTP implementation presenting itself as a regular browser.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(HttpFetcher { http })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!("Fetching document {}", url);
        let resp = self
            .http
            .get(url)
            .header("accept", "text/html,application/xhtml+xml")
            .header("accept-language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let bytes = resp.bytes().await.map_err(|source| FetchError::Network {
            url: url.to_string(),
            source,
        })?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FetchError::MalformedBody {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves saved documents by URL and records every request.
    #[derive(Default)]
    pub struct FixtureFetcher {
        pages: HashMap<String, String>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FixtureFetcher {
        pub fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    #[async_trait]
    impl DocumentFetcher for FixtureFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if let Ok(mut log) = self.requests.lock() {
                log.push(url.to_string());
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::MalformedBody {
                    url: url.to_string(),
                    reason: "no fixture".into(),
                })
        }
    }
}
