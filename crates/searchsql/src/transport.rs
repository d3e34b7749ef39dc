//! Engine transport
//!
//! The executor only needs "send this body to this index, give me the JSON
//! back". Retries and authentication belong to the transport, not the core.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::error::SqlError;
use crate::Result;

/// Sends a compiled search request to the engine.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Run `body` against `index` and return the raw response.
    async fn search(&self, index: &str, body: &Value) -> Result<Value>;
}

/// HTTP transport for the engine's `_search` endpoint.
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SqlError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(config, client))
    }

    /// Create with an injected reqwest client.
    pub fn with_client(config: &SessionConfig, client: reqwest::Client) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn search_url(&self, index: &str) -> String {
        format!("{}/{}/_search?typed_keys=true", self.endpoint, index)
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        let url = self.search_url(index);
        tracing::debug!(url = %url, "sending search request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SqlError::Engine(format!("search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(SqlError::Engine(format!(
                "search API returned {}: {}",
                status, body_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SqlError::Engine(format!("failed to parse search response: {}", e)))
    }
}
