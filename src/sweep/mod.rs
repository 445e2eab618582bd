//! Sweep orchestration
//!
//! ```text
//! RateLimiter (advice) -> SweepValidator -> SweepExecutor -> Notifier
//!                               \               /
//!                                FailureRecovery
//! ```

pub mod executor;
pub mod pipeline;
pub mod rate_limit;
pub mod types;
pub mod validator;

pub use executor::SweepExecutor;
pub use pipeline::{SweepOutcome, SweepPipeline};
pub use rate_limit::{Admission, CooldownState, CooldownStore, InMemoryCooldownStore, RateLimiter};
pub use types::{
    ReadySweep, Rejection, Step, SweepFailure, SweepReceipt, Validation, ValidationReport,
    WalletCredentials,
};
pub use validator::SweepValidator;
