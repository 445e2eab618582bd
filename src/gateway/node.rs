//! Node API client
//!
//! JSON-over-HTTP wrapper around the TRON node service: balances, fee
//! estimation and signed transfers.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChainGateway, TransferOrder, TransferResult};
use crate::config::{AdminConfig, NodeConfig};
use crate::error::{Error, Result};

#[derive(Serialize)]
struct BalanceRequest<'a> {
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<&'a str>,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OptimalFeeRequest<'a> {
    from_address: &'a str,
    to_address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<&'a str>,
}

#[derive(Deserialize)]
struct OptimalFeeResponse {
    fee: Decimal,
}

/// Node API client
pub struct NodeClient {
    /// HTTP client
    client: Client,
    /// Base URL of the node service
    base_url: String,
    /// Admin wallet, used to fund fee top-ups
    admin: AdminConfig,
}

impl NodeClient {
    /// Create a new node client
    pub fn new(config: &NodeConfig, admin: AdminConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            admin,
        })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Node(format!("{} request failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Node(format!("{} returned {}: {}", path, status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse {} response: {}", path, e)))
    }
}

#[async_trait]
impl ChainGateway for NodeClient {
    async fn balance(&self, address: &str, symbol: Option<&str>) -> Result<Decimal> {
        debug!(address, symbol, "Fetching balance");
        let response: BalanceResponse = self
            .post("/balance", &BalanceRequest { address, symbol })
            .await?;
        Ok(response.balance)
    }

    async fn optimal_fee(&self, from: &str, to: &str, symbol: Option<&str>) -> Result<Decimal> {
        let response: OptimalFeeResponse = self
            .post(
                "/optimal-fee",
                &OptimalFeeRequest {
                    from_address: from,
                    to_address: to,
                    symbol,
                },
            )
            .await?;
        Ok(response.fee)
    }

    async fn send_transaction(&self, order: &TransferOrder) -> Result<TransferResult> {
        debug!(
            from = %order.from_address,
            to = %order.to_address,
            amount = %order.amount,
            symbol = ?order.symbol,
            "Broadcasting transfer"
        );
        self.post("/send-transaction", order).await
    }

    async fn fund_native(&self, address: &str, amount: Decimal) -> Result<bool> {
        let order = TransferOrder {
            from_address: self.admin.address.clone(),
            from_private_key: self.admin.private_key.clone(),
            to_address: address.to_string(),
            amount,
            symbol: None,
        };

        let result = self.send_transaction(&order).await?;
        if result.status {
            info!(address, %amount, tx_id = %result.tx_id, "Native top-up sent");
        } else {
            warn!(address, %amount, "Node refused native top-up");
        }
        Ok(result.status)
    }
}
