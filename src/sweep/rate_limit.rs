//! Advisory per-address cooldown
//!
//! The limiter never rejects work. It tells the dispatcher how long to hold a
//! sweep back so that repeated deposits to the same address are spread one
//! cooldown apart instead of racing each other on-chain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cooldown bookkeeping for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownState {
    /// When the most recently admitted attempt runs (or ran)
    pub last_attempt: DateTime<Utc>,
    /// Earliest start for the next attempt
    pub next_allowed: DateTime<Utc>,
}

/// Storage for cooldown state
///
/// Lost updates between concurrent callers only skew the advisory delay.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn get(&self, address: &str) -> Option<CooldownState>;
    async fn put(&self, address: &str, state: CooldownState);
}

/// Process-local cooldown table
#[derive(Default)]
pub struct InMemoryCooldownStore {
    entries: DashMap<String, CooldownState>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose cooldown ended before `now`
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| state.next_allowed > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn get(&self, address: &str) -> Option<CooldownState> {
        self.entries.get(address).map(|s| *s.value())
    }

    async fn put(&self, address: &str, state: CooldownState) {
        self.entries.insert(address.to_string(), state);
    }
}

/// Limiter advice for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub wait: Duration,
}

impl Admission {
    /// Delay to attach to the dispatched task, if any
    pub fn delay(&self, threshold: Duration) -> Option<Duration> {
        if !self.allowed && self.wait > threshold {
            Some(self.wait)
        } else {
            None
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CooldownStore>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CooldownStore>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }

    /// Whether an attempt for `address` may start now, and if not, how long until it may
    pub async fn can_go(&self, address: &str) -> Admission {
        self.can_go_at(address, Utc::now()).await
    }

    pub async fn can_go_at(&self, address: &str, now: DateTime<Utc>) -> Admission {
        let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::zero());

        match self.store.get(address).await {
            Some(state) if now < state.next_allowed => {
                let wait = (state.next_allowed - now).to_std().unwrap_or_default();
                // Book the next free slot so a burst is staggered, not stacked
                self.store
                    .put(
                        address,
                        CooldownState {
                            last_attempt: state.next_allowed,
                            next_allowed: state.next_allowed + cooldown,
                        },
                    )
                    .await;
                debug!(address, wait_secs = wait.as_secs(), "Address is cooling down");
                Admission {
                    allowed: false,
                    wait,
                }
            }
            _ => {
                self.store
                    .put(
                        address,
                        CooldownState {
                            last_attempt: now,
                            next_allowed: now + cooldown,
                        },
                    )
                    .await;
                Admission {
                    allowed: true,
                    wait: Duration::ZERO,
                }
            }
        }
    }
}
