//! Sweep execution
//!
//! Moves a validated balance to the admin wallet and reports it. A failed
//! notification is treated exactly like a failed transfer so that no
//! completed sweep goes unreported.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use super::types::{AtStep, ReadySweep, Step, SweepFailure, SweepReceipt};
use crate::error::Error;
use crate::gateway::{ChainGateway, Notifier, SweepAlert, TransferOrder};

pub struct SweepExecutor {
    chain: Arc<dyn ChainGateway>,
    notifier: Arc<dyn Notifier>,
    admin_address: String,
}

impl SweepExecutor {
    pub fn new(chain: Arc<dyn ChainGateway>, notifier: Arc<dyn Notifier>, admin_address: String) -> Self {
        Self {
            chain,
            notifier,
            admin_address,
        }
    }

    pub async fn execute(&self, ready: &ReadySweep) -> Result<SweepReceipt, SweepFailure> {
        let address = ready.credentials.address.as_str();

        info!(
            address,
            to = %self.admin_address,
            amount = %ready.amount,
            symbol = ?ready.symbol,
            "Sending to the admin wallet"
        );

        let order = TransferOrder {
            from_address: address.to_string(),
            from_private_key: ready.credentials.private_key.clone(),
            to_address: self.admin_address.clone(),
            amount: ready.amount,
            symbol: ready.symbol.clone(),
        };

        let result = self.chain.send_transaction(&order).await.at(Step::Transfer)?;
        if !result.status {
            error!(address, amount = %ready.amount, "Transfer to the admin wallet did not happen");
            return Err(SweepFailure::new(
                Step::Transfer,
                Error::TransferFailed {
                    address: address.to_string(),
                    amount: ready.amount,
                },
            ));
        }

        info!(address, tx_id = %result.tx_id, "Swept to the admin wallet");

        let alert = SweepAlert {
            timestamp: Utc::now().timestamp(),
            transaction_hash: result.tx_id.clone(),
            address: address.to_string(),
            amount: ready.amount,
        };
        self.notifier.notify(&alert).await.at(Step::Notify)?;

        Ok(SweepReceipt {
            tx_id: result.tx_id,
            amount: ready.amount,
        })
    }
}
