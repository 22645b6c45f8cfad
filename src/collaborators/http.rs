//! HTTP collector.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};
use tracing::debug;

use super::{CollectedContent, Collector};
use crate::errors::OperationError;

/// Fetches sources with a plain GET. Timeouts are left to the executor.
pub struct HttpCollector {
    client: Client,
}

fn header(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl HttpCollector {
    pub fn new(user_agent: &str) -> Result<Self, OperationError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| OperationError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn collect(&self, url: &str) -> Result<CollectedContent, OperationError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OperationError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let headers = response.headers();
        let content_type = header(headers, CONTENT_TYPE);
        let etag = header(headers, ETAG);
        let last_modified = header(headers, LAST_MODIFIED);

        let content = response.text().await?;
        debug!(url = %url, status = status.as_u16(), bytes = content.len(), "Fetched source");

        Ok(CollectedContent {
            content,
            status_code: status.as_u16(),
            content_type,
            etag,
            last_modified,
        })
    }
}
