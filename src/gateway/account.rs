//! Account API client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::AccountApi;
use crate::config::ApiConfig;
use crate::error::{Error, Result};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrivateKeyResponse {
    private_key: String,
}

/// Client for the platform API that owns deposit addresses
pub struct AccountApiClient {
    client: Client,
    base_url: String,
}

impl AccountApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if !config.bearer_token.is_empty() {
            let value = HeaderValue::from_str(&config.bearer_token)
                .map_err(|e| Error::Config(format!("Invalid bearer token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<R: serde::de::DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::AccountApi(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AccountApi(format!("API error {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse API response: {}", e)))
    }
}

#[async_trait]
impl AccountApi for AccountApiClient {
    async fn private_key(&self, address: &str) -> Result<String> {
        debug!(address, "Fetching private key");
        let response: PrivateKeyResponse = self.get(&format!("/get-private-key/{}", address)).await?;
        if response.private_key.is_empty() {
            return Err(Error::AccountApi(format!("no private key for {}", address)));
        }
        Ok(response.private_key)
    }

    async fn all_addresses(&self) -> Result<Vec<String>> {
        self.get("/get-user-addresses").await
    }
}
