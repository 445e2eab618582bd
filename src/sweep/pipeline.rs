//! One sweep attempt, start to finish

use std::sync::Arc;
use tracing::{info, instrument};

use super::executor::SweepExecutor;
use super::types::{Rejection, SweepFailure, SweepReceipt, Validation};
use super::validator::SweepValidator;
use crate::queue::SweepRequest;
use crate::recovery::{FailureRecovery, RecoveryAction};

/// How an attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Completed(SweepReceipt),
    /// Expected steady-state skip; the next deposit message polls again
    Rejected(Rejection),
    /// Handed to failure recovery
    Failed(RecoveryAction),
}

pub struct SweepPipeline {
    validator: SweepValidator,
    executor: SweepExecutor,
    recovery: Arc<FailureRecovery>,
}

impl SweepPipeline {
    pub fn new(validator: SweepValidator, executor: SweepExecutor, recovery: Arc<FailureRecovery>) -> Self {
        Self {
            validator,
            executor,
            recovery,
        }
    }

    pub fn recovery(&self) -> &Arc<FailureRecovery> {
        &self.recovery
    }

    #[instrument(skip(self, request), fields(address = %request.address, token = %request.token))]
    pub async fn run(&self, request: &SweepRequest) -> SweepOutcome {
        match self.attempt(request).await {
            Ok(SweepOutcome::Rejected(rejection)) => {
                info!("Sweep skipped: {}", rejection);
                SweepOutcome::Rejected(rejection)
            }
            Ok(outcome) => outcome,
            Err(failure) => SweepOutcome::Failed(self.recovery.recover(request, &failure).await),
        }
    }

    async fn attempt(&self, request: &SweepRequest) -> Result<SweepOutcome, SweepFailure> {
        match self.validator.validate(request).await? {
            Validation::Rejected(rejection) => Ok(SweepOutcome::Rejected(rejection)),
            Validation::Ready(ready) => {
                let receipt = self.executor.execute(&ready).await?;
                Ok(SweepOutcome::Completed(receipt))
            }
        }
    }
}
