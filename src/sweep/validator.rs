//! Sweep validation
//!
//! Decides whether an address is worth sweeping and can pay for it:
//!
//! ```text
//! START -> TOKEN_BALANCE_CHECK -> FEE_CHECK -> [NATIVE_TOPUP] -> READY
//!                 |                   |
//!                 v                   v
//!      REJECTED_LOW_BALANCE   REJECTED_LOW_FEE_FUNDS
//! ```
//!
//! Rejections are the normal "not yet" outcome and are not retried; every
//! other problem comes back as a [`SweepFailure`] for recovery.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{
    AtStep, ReadySweep, Rejection, Step, SweepFailure, Validation, ValidationReport,
    WalletCredentials,
};
use crate::config::SweepConfig;
use crate::error::Error;
use crate::gateway::{AccountApi, ChainGateway};
use crate::queue::SweepRequest;

pub struct SweepValidator {
    chain: Arc<dyn ChainGateway>,
    accounts: Arc<dyn AccountApi>,
    admin_address: String,
    settings: SweepConfig,
}

impl SweepValidator {
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        accounts: Arc<dyn AccountApi>,
        admin_address: String,
        settings: SweepConfig,
    ) -> Self {
        Self {
            chain,
            accounts,
            admin_address,
            settings,
        }
    }

    pub async fn validate(&self, request: &SweepRequest) -> Result<Validation, SweepFailure> {
        let address = request.address.as_str();
        let native = self.settings.is_native(&request.token);
        let symbol = if native { None } else { Some(request.token.as_str()) };
        let mut report = ValidationReport::default();

        // TOKEN_BALANCE_CHECK
        let private_key = self.accounts.private_key(address).await.at(Step::Credentials)?;
        let credentials = WalletCredentials {
            address: address.to_string(),
            private_key,
        };

        report.token_balance = self.chain.balance(address, symbol).await.at(Step::TokenBalance)?;
        if let Some(minimum) = self.settings.min_cost(&request.token) {
            if report.token_balance < minimum {
                info!(
                    address,
                    token = %request.token,
                    balance = %report.token_balance,
                    %minimum,
                    "Balance too small to sweep"
                );
                return Ok(Validation::Rejected(Rejection::LowBalance {
                    balance: report.token_balance,
                    minimum,
                }));
            }
        }
        report.token_balance_ok = true;

        // FEE_CHECK
        report.native_balance = if native {
            report.token_balance
        } else {
            self.chain.balance(address, None).await.at(Step::FeeCheck)?
        };
        report.fee = self
            .chain
            .optimal_fee(address, &self.admin_address, symbol)
            .await
            .at(Step::FeeCheck)?;
        report.fee_ok = report.native_balance - report.fee > Decimal::ZERO;
        debug!(address, ?report, "Fee check");

        let mut topped_up = false;
        if !report.fee_ok {
            warn!(
                address,
                native_balance = %report.native_balance,
                fee = %report.fee,
                "Not enough native currency to pay the fee"
            );

            if !self.settings.auto_top_up {
                return Ok(Validation::Rejected(Rejection::LowFeeFunds {
                    native_balance: report.native_balance,
                    fee: report.fee,
                }));
            }

            // NATIVE_TOPUP
            self.top_up(address, report.fee).await?;
            topped_up = true;
            // The top-up is not re-checked on-chain after settling
            tokio::time::sleep(self.settings.settle_delay()).await;
        }

        // READY
        Ok(Validation::Ready(ReadySweep {
            credentials,
            symbol: symbol.map(str::to_string),
            amount: report.token_balance,
            report,
            topped_up,
        }))
    }

    async fn top_up(&self, address: &str, fee: Decimal) -> Result<(), SweepFailure> {
        let funded = self.chain.fund_native(address, fee).await.at(Step::TopUp)?;
        if !funded {
            return Err(SweepFailure::new(
                Step::TopUp,
                Error::TopUpFailed {
                    address: address.to_string(),
                    amount: fee,
                },
            ));
        }
        info!(address, %fee, "Native top-up sent, waiting for it to settle");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChainCall, FakeAccounts, FakeChain, ADMIN, USER};
    use std::collections::HashMap;

    fn settings(min_usdt: i64) -> SweepConfig {
        SweepConfig {
            min_token_cost: HashMap::from([("USDT".to_string(), Decimal::from(min_usdt))]),
            settle_delay_ms: 0,
            ..Default::default()
        }
    }

    fn validator(chain: Arc<FakeChain>, settings: SweepConfig) -> SweepValidator {
        SweepValidator::new(chain, Arc::new(FakeAccounts::new()), ADMIN.to_string(), settings)
    }

    #[tokio::test]
    async fn test_ready_when_balance_and_fee_ok() {
        let chain = Arc::new(FakeChain::new(50, 100, 5));
        let validation = validator(chain.clone(), settings(10))
            .validate(&SweepRequest::new(USER, "USDT"))
            .await
            .unwrap();

        let ready = match validation {
            Validation::Ready(ready) => ready,
            other => panic!("expected ready, got {:?}", other),
        };
        assert_eq!(ready.amount, Decimal::from(50));
        assert_eq!(ready.symbol.as_deref(), Some("USDT"));
        assert_eq!(ready.credentials.private_key, format!("key-{}", USER));
        assert!(ready.report.token_balance_ok && ready.report.fee_ok);
        assert!(!ready.topped_up);
        assert!(chain.top_ups().is_empty());
    }

    #[tokio::test]
    async fn test_low_balance_is_rejected_without_fee_check() {
        let chain = Arc::new(FakeChain::new(5, 100, 5));
        let validation = validator(chain.clone(), settings(10))
            .validate(&SweepRequest::new(USER, "usdt"))
            .await
            .unwrap();

        assert!(matches!(
            validation,
            Validation::Rejected(Rejection::LowBalance { .. })
        ));
        assert_eq!(chain.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_tops_up_exactly_the_fee() {
        let chain = Arc::new(FakeChain::new(50, 5, 5));
        let validation = validator(chain.clone(), settings(10))
            .validate(&SweepRequest::new(USER, "USDT"))
            .await
            .unwrap();

        assert!(matches!(validation, Validation::Ready(ref r) if r.topped_up));
        assert_eq!(chain.top_ups(), vec![Decimal::from(5)]);
        assert!(chain.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_failed_top_up_is_a_failure() {
        let mut chain = FakeChain::new(50, 0, 5);
        chain.fund_ok = false;
        let failure = validator(Arc::new(chain), settings(10))
            .validate(&SweepRequest::new(USER, "USDT"))
            .await
            .unwrap_err();

        assert_eq!(failure.step, Step::TopUp);
        assert!(matches!(failure.error, Error::TopUpFailed { .. }));
    }

    #[tokio::test]
    async fn test_low_fee_funds_without_auto_top_up() {
        let chain = Arc::new(FakeChain::new(50, 1, 5));
        let mut settings = settings(10);
        settings.auto_top_up = false;

        let validation = validator(chain.clone(), settings)
            .validate(&SweepRequest::new(USER, "USDT"))
            .await
            .unwrap();

        assert!(matches!(
            validation,
            Validation::Rejected(Rejection::LowFeeFunds { .. })
        ));
        assert!(chain.top_ups().is_empty());
    }

    #[tokio::test]
    async fn test_native_sweep_sends_full_balance() {
        let chain = Arc::new(FakeChain::new(0, 100, 5));
        let validation = validator(chain.clone(), settings(10))
            .validate(&SweepRequest::new(USER, "TRX"))
            .await
            .unwrap();

        match validation {
            Validation::Ready(ready) => {
                assert_eq!(ready.symbol, None);
                assert_eq!(ready.amount, Decimal::from(100));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        // Native balance is read once
        let balance_calls = chain
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ChainCall::Balance { .. }))
            .count();
        assert_eq!(balance_calls, 1);
    }

    #[tokio::test]
    async fn test_native_sweep_tops_up_the_fee() {
        let chain = Arc::new(FakeChain::new(0, 3, 5));
        let validation = validator(chain.clone(), settings(10))
            .validate(&SweepRequest::new(USER, ""))
            .await
            .unwrap();

        match validation {
            Validation::Ready(ready) => {
                assert!(ready.topped_up);
                assert_eq!(ready.amount, Decimal::from(3));
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert_eq!(chain.top_ups(), vec![Decimal::from(5)]);
    }

    #[tokio::test]
    async fn test_node_error_is_tagged_with_step() {
        let mut chain = FakeChain::new(50, 100, 5);
        chain.balance_error = true;
        let failure = validator(Arc::new(chain), settings(10))
            .validate(&SweepRequest::new(USER, "USDT"))
            .await
            .unwrap_err();

        assert_eq!(failure.step, Step::TokenBalance);
        assert!(failure.error.is_transient());
    }
}
