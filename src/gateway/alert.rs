//! Alerting endpoint client

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Notifier, SweepAlert};
use crate::error::{Error, Result};

pub struct AlertClient {
    client: Client,
    url: String,
}

impl AlertClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for AlertClient {
    async fn notify(&self, alert: &SweepAlert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("alert endpoint returned {}: {}", status, body)));
        }

        Ok(())
    }
}
