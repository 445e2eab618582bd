//! In-memory fakes of the external collaborators, for unit tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::gateway::{AccountApi, ChainGateway, Notifier, SweepAlert, TransferOrder, TransferResult};
use crate::queue::MessagePublisher;

pub const USER: &str = "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8";
pub const ADMIN: &str = "TKh65nBir3AnSSigXG1NTy5Jh5vdYzoLmt";

/// Every call made against [`FakeChain`], in order
#[derive(Debug, Clone, PartialEq)]
pub enum ChainCall {
    Balance { address: String, symbol: Option<String> },
    OptimalFee { from: String, to: String, symbol: Option<String> },
    Send(TransferOrderSnapshot),
    FundNative { address: String, amount: Decimal },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferOrderSnapshot {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub symbol: Option<String>,
}

pub struct FakeChain {
    pub token_balance: Decimal,
    pub native_balance: Decimal,
    pub fee: Decimal,
    pub transfer_ok: bool,
    pub fund_ok: bool,
    pub balance_error: bool,
    calls: Mutex<Vec<ChainCall>>,
}

impl FakeChain {
    pub fn new(token_balance: i64, native_balance: i64, fee: i64) -> Self {
        Self {
            token_balance: Decimal::from(token_balance),
            native_balance: Decimal::from(native_balance),
            fee: Decimal::from(fee),
            transfer_ok: true,
            fund_ok: true,
            balance_error: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<TransferOrderSnapshot> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::Send(order) => Some(order),
                _ => None,
            })
            .collect()
    }

    pub fn top_ups(&self) -> Vec<Decimal> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ChainCall::FundNative { amount, .. } => Some(amount),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ChainCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChainGateway for FakeChain {
    async fn balance(&self, address: &str, symbol: Option<&str>) -> Result<Decimal> {
        self.record(ChainCall::Balance {
            address: address.to_string(),
            symbol: symbol.map(str::to_string),
        });
        if self.balance_error {
            return Err(Error::Node("node unreachable".to_string()));
        }
        Ok(match symbol {
            Some(_) => self.token_balance,
            None => self.native_balance,
        })
    }

    async fn optimal_fee(&self, from: &str, to: &str, symbol: Option<&str>) -> Result<Decimal> {
        self.record(ChainCall::OptimalFee {
            from: from.to_string(),
            to: to.to_string(),
            symbol: symbol.map(str::to_string),
        });
        Ok(self.fee)
    }

    async fn send_transaction(&self, order: &TransferOrder) -> Result<TransferResult> {
        self.record(ChainCall::Send(TransferOrderSnapshot {
            from: order.from_address.clone(),
            to: order.to_address.clone(),
            amount: order.amount,
            symbol: order.symbol.clone(),
        }));
        Ok(TransferResult {
            status: self.transfer_ok,
            tx_id: if self.transfer_ok { "tx-1".to_string() } else { String::new() },
        })
    }

    async fn fund_native(&self, address: &str, amount: Decimal) -> Result<bool> {
        self.record(ChainCall::FundNative {
            address: address.to_string(),
            amount,
        });
        Ok(self.fund_ok)
    }
}

pub struct FakeAccounts {
    pub addresses: Vec<String>,
}

impl FakeAccounts {
    pub fn new() -> Self {
        Self {
            addresses: vec![USER.to_string()],
        }
    }
}

#[async_trait]
impl AccountApi for FakeAccounts {
    async fn private_key(&self, address: &str) -> Result<String> {
        Ok(format!("key-{}", address))
    }

    async fn all_addresses(&self) -> Result<Vec<String>> {
        Ok(self.addresses.clone())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub fail: AtomicBool,
    alerts: Mutex<Vec<SweepAlert>>,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn alerts(&self) -> Vec<SweepAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, alert: &SweepAlert) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notification("alert endpoint down".to_string()));
        }
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Publisher that records bodies and can be told to reject some of them
#[derive(Default)]
pub struct FakePublisher {
    pub fail_all: bool,
    /// Bodies containing this text are rejected
    pub fail_matching: Option<String>,
    published: Mutex<Vec<Vec<u8>>>,
}

impl FakePublisher {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Default::default()
        }
    }

    /// Reject only bodies containing `needle`
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_matching: Some(needle.to_string()),
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for FakePublisher {
    async fn publish(&self, body: &[u8]) -> Result<()> {
        let rejected = self.fail_all
            || self
                .fail_matching
                .as_deref()
                .map(|needle| String::from_utf8_lossy(body).contains(needle))
                .unwrap_or(false);
        if rejected {
            return Err(Error::Broker("broker unreachable".to_string()));
        }
        self.published.lock().unwrap().push(body.to_vec());
        Ok(())
    }
}
