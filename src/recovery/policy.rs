//! Retry policy for failed sweeps

use crate::queue::SweepRequest;
use crate::sweep::SweepFailure;

/// What to do with a failed sweep request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put it back on the queue
    Requeue,
    /// Give up; the request stays only in the error journal
    Abandon,
}

/// Decides whether a failed request is retried
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, request: &SweepRequest, failure: &SweepFailure) -> RetryDecision;
}

/// Funds must eventually be swept: every failure is re-queued, forever
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRequeue;

impl RetryPolicy for AlwaysRequeue {
    fn decide(&self, _request: &SweepRequest, _failure: &SweepFailure) -> RetryDecision {
        RetryDecision::Requeue
    }
}
