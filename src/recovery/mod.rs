//! Failure recovery
//!
//! Every failed sweep is journalled, then re-queued according to the
//! [`RetryPolicy`]. If the broker refuses the re-queue the message is parked
//! in the [`DeferredStore`] and replayed later.
//!
//! ```text
//! SweepFailure -> journal -> policy -> publish --(broker down)--> deferred file
//! ```

pub mod deferred;
pub mod journal;
pub mod policy;

use std::sync::Arc;
use tracing::{error, warn};

use crate::queue::{MessagePublisher, SweepRequest};
use crate::sweep::{Step, SweepFailure};

pub use deferred::{DeferredStore, ReplaySummary};
pub use journal::{ErrorJournal, FailureRecord};
pub use policy::{AlwaysRequeue, RetryDecision, RetryPolicy};

/// Where a failed request ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    Requeued,
    Deferred(std::path::PathBuf),
    Abandoned,
    /// Neither the broker nor local storage took it; only the journal has it
    Lost,
}

pub struct FailureRecovery {
    publisher: Arc<dyn MessagePublisher>,
    deferred: Arc<DeferredStore>,
    journal: Arc<ErrorJournal>,
    policy: Arc<dyn RetryPolicy>,
}

impl FailureRecovery {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        deferred: Arc<DeferredStore>,
        journal: Arc<ErrorJournal>,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            publisher,
            deferred,
            journal,
            policy,
        }
    }

    pub fn journal(&self) -> &Arc<ErrorJournal> {
        &self.journal
    }

    pub async fn recover(&self, request: &SweepRequest, failure: &SweepFailure) -> RecoveryAction {
        error!(
            step = %failure.step,
            code = failure.step.code(),
            transient = failure.error.is_transient(),
            address = %request.address,
            token = %request.token,
            "Sweep failed: {}",
            failure.error
        );

        let payload = match request.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(address = %request.address, "Cannot encode request for retry: {}", e);
                self.journal.record(failure.step, &failure.error, None).await;
                return RecoveryAction::Lost;
            }
        };
        self.journal
            .record(failure.step, &failure.error, Some(&payload))
            .await;

        match self.policy.decide(request, failure) {
            RetryDecision::Requeue => self.requeue(request, &payload).await,
            RetryDecision::Abandon => {
                warn!(address = %request.address, token = %request.token, "Retry policy abandoned sweep");
                RecoveryAction::Abandoned
            }
        }
    }

    /// Put a request that never ran back on the queue, without journalling a failure
    pub async fn hand_back(&self, request: &SweepRequest) -> RecoveryAction {
        match request.to_payload() {
            Ok(payload) => self.requeue(request, &payload).await,
            Err(e) => {
                error!(address = %request.address, "Cannot encode request for re-queue: {}", e);
                self.journal.record(Step::Requeue, &e, None).await;
                RecoveryAction::Lost
            }
        }
    }

    async fn requeue(&self, request: &SweepRequest, payload: &[u8]) -> RecoveryAction {
        let publish_error = match self.publisher.publish(payload).await {
            Ok(()) => return RecoveryAction::Requeued,
            Err(e) => e,
        };

        error!(step = %Step::Requeue, address = %request.address, "Re-queue failed: {}", publish_error);
        self.journal
            .record(Step::Requeue, &publish_error, Some(payload))
            .await;

        match self.deferred.store(payload).await {
            Ok(path) => {
                warn!(file = %path.display(), address = %request.address, "Parked sweep for later replay");
                RecoveryAction::Deferred(path)
            }
            Err(e) => {
                error!(step = %Step::DeferredWrite, address = %request.address, "Cannot park sweep: {}", e);
                self.journal.record(Step::DeferredWrite, &e, Some(payload)).await;
                RecoveryAction::Lost
            }
        }
    }
}
