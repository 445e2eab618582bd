//! External collaborators
//!
//! The sweep pipeline talks to three services through narrow traits:
//!
//! ```text
//! ChainGateway  - node API: balances, fees, transfers, native top-ups
//! AccountApi    - platform API: deposit addresses and their keys
//! Notifier      - alerting endpoint for completed sweeps
//! ```
//!
//! HTTP implementations live in the submodules.

pub mod account;
pub mod alert;
pub mod node;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use account::AccountApiClient;
pub use alert::AlertClient;
pub use node::NodeClient;

/// Transfer to broadcast
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOrder {
    pub from_address: String,
    pub from_private_key: String,
    pub to_address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// Node verdict on a broadcast
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub status: bool,
    #[serde(default)]
    pub tx_id: String,
}

/// Body reported to the alerting system after a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepAlert {
    /// Unix seconds
    pub timestamp: i64,
    pub transaction_hash: String,
    pub address: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Blockchain node operations
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Balance of `symbol` (native currency when `None`)
    async fn balance(&self, address: &str, symbol: Option<&str>) -> Result<Decimal>;

    /// Estimated fee, in native currency, for moving `symbol` between two addresses
    async fn optimal_fee(&self, from: &str, to: &str, symbol: Option<&str>) -> Result<Decimal>;

    async fn send_transaction(&self, order: &TransferOrder) -> Result<TransferResult>;

    /// Send native currency from the admin wallet; `Ok(false)` when the node refused
    async fn fund_native(&self, address: &str, amount: Decimal) -> Result<bool>;
}

/// Platform account API
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn private_key(&self, address: &str) -> Result<String>;

    async fn all_addresses(&self) -> Result<Vec<String>>;
}

/// Alerting endpoint
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &SweepAlert) -> Result<()>;
}
