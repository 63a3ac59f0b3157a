//! API client for the perf-monitor daemon

use anyhow::{Context, Result};
use monitor_lib::OperationResult;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

/// API client for the perf-monitor HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_with_query(path, &[]).await
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path, query)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path, &[])?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse_response(response).await
    }
}

/// Decode a success body, or surface the daemon's `{success: false, error}`
async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<OperationResult>(&body)
            .ok()
            .and_then(|result| result.error)
            .unwrap_or(body);
        anyhow::bail!("API error ({}): {}", status, message);
    }

    response.json().await.context("Failed to parse response")
}
