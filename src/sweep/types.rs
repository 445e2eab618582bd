//! Shared types for the sweep pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Processing stage that produced an error
///
/// Codes are stable and end up in the error journal; never renumber them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Connect,
    Consume,
    Decode,
    Ack,
    Credentials,
    TokenBalance,
    FeeCheck,
    TopUp,
    Transfer,
    Notify,
    Requeue,
    DeferredWrite,
    Replay,
    Enqueue,
}

impl Step {
    pub fn code(self) -> u16 {
        match self {
            Step::Connect => 10,
            Step::Consume => 11,
            Step::Decode => 12,
            Step::Ack => 13,
            Step::Credentials => 20,
            Step::TokenBalance => 21,
            Step::FeeCheck => 22,
            Step::TopUp => 23,
            Step::Transfer => 24,
            Step::Notify => 25,
            Step::Requeue => 30,
            Step::DeferredWrite => 31,
            Step::Replay => 32,
            Step::Enqueue => 33,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STEP {} ({:?})", self.code(), self)
    }
}

/// Address and signing key, fetched for a single attempt
#[derive(Clone)]
pub struct WalletCredentials {
    pub address: String,
    pub private_key: String,
}

impl fmt::Debug for WalletCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletCredentials")
            .field("address", &self.address)
            .field("private_key", &"***")
            .finish()
    }
}

/// Balances observed while validating one attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub token_balance_ok: bool,
    pub token_balance: Decimal,
    pub fee_ok: bool,
    pub fee: Decimal,
    pub native_balance: Decimal,
}

/// Expected, non-retryable reasons to skip a sweep
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Balance below the token's minimum sweep threshold
    LowBalance { balance: Decimal, minimum: Decimal },
    /// Not enough fee currency and no top-up possible
    LowFeeFunds { native_balance: Decimal, fee: Decimal },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::LowBalance { balance, minimum } => {
                write!(f, "balance {} is below the minimum {}", balance, minimum)
            }
            Rejection::LowFeeFunds { native_balance, fee } => {
                write!(f, "native balance {} cannot pay fee {}", native_balance, fee)
            }
        }
    }
}

/// A validated attempt, ready for the executor
#[derive(Debug, Clone)]
pub struct ReadySweep {
    pub credentials: WalletCredentials,
    /// Token symbol passed to the node, `None` for native sweeps
    pub symbol: Option<String>,
    /// Amount to transfer
    pub amount: Decimal,
    pub report: ValidationReport,
    /// Whether a native top-up was sent during validation
    pub topped_up: bool,
}

/// Validator verdict
#[derive(Debug, Clone)]
pub enum Validation {
    Ready(ReadySweep),
    Rejected(Rejection),
}

/// Completed transfer
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReceipt {
    pub tx_id: String,
    pub amount: Decimal,
}

/// An attempt that must go through failure recovery
#[derive(Debug)]
pub struct SweepFailure {
    pub step: Step,
    pub error: Error,
}

impl SweepFailure {
    pub fn new(step: Step, error: Error) -> Self {
        Self { step, error }
    }
}

impl fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Attach a step to a fallible call
pub trait AtStep<T> {
    fn at(self, step: Step) -> std::result::Result<T, SweepFailure>;
}

impl<T> AtStep<T> for crate::error::Result<T> {
    fn at(self, step: Step) -> std::result::Result<T, SweepFailure> {
        self.map_err(|error| SweepFailure::new(step, error))
    }
}
