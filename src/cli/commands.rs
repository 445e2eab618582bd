//! CLI command implementations

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::gateway::{AccountApi, AccountApiClient, AlertClient, NodeClient};
use crate::queue::{AmqpPublisher, MessagePublisher, QueueConsumer, SweepDispatcher, SweepRequest};
use crate::recovery::{AlwaysRequeue, DeferredStore, ErrorJournal, FailureRecovery};
use crate::sweep::{InMemoryCooldownStore, RateLimiter, Step, SweepExecutor, SweepPipeline, SweepValidator};

/// Local storage and the broker publisher, shared by every command
struct Storage {
    publisher: Arc<dyn MessagePublisher>,
    deferred: Arc<DeferredStore>,
    journal: Arc<ErrorJournal>,
}

impl Storage {
    async fn open(config: &Config) -> Result<Self> {
        let deferred = Arc::new(DeferredStore::new(config.storage.deferred_dir.clone()));
        deferred.ensure_dir().await?;
        if let Some(parent) = config.storage.error_log.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(Self {
            publisher: Arc::new(AmqpPublisher::new(&config.broker)),
            deferred,
            journal: Arc::new(ErrorJournal::new(config.storage.error_log.clone())),
        })
    }
}

/// Run the balancer service until Ctrl-C
pub async fn run(config: &Config) -> Result<()> {
    info!(
        network = ?config.network,
        queue = %config.broker.queue,
        admin = %config.admin.address,
        "Starting balancer..."
    );

    let storage = Storage::open(config).await?;

    let summary = storage
        .deferred
        .replay(storage.publisher.as_ref(), &storage.journal)
        .await;
    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some deferred messages were not resent");
    }

    let chain = Arc::new(NodeClient::new(&config.node, config.admin.clone())?);
    let accounts = Arc::new(AccountApiClient::new(&config.api)?);
    let notifier = Arc::new(AlertClient::new(
        config.alert_url(),
        Duration::from_millis(config.alert.timeout_ms),
    )?);

    let recovery = Arc::new(FailureRecovery::new(
        storage.publisher.clone(),
        storage.deferred.clone(),
        storage.journal.clone(),
        Arc::new(AlwaysRequeue),
    ));
    let validator = SweepValidator::new(
        chain.clone(),
        accounts,
        config.admin.address.clone(),
        config.sweep.clone(),
    );
    let executor = SweepExecutor::new(chain, notifier, config.admin.address.clone());
    let pipeline = Arc::new(SweepPipeline::new(validator, executor, recovery));

    let cooldowns = Arc::new(InMemoryCooldownStore::new());
    let limiter = Arc::new(RateLimiter::new(cooldowns.clone(), config.sweep.cooldown()));

    let tracker = TaskTracker::new();
    let dispatcher = Arc::new(SweepDispatcher::new(
        limiter,
        pipeline,
        storage.journal.clone(),
        tracker.clone(),
        config.sweep.delay_threshold(),
    ));
    let consumer = Arc::new(
        QueueConsumer::new(config.broker.clone(), dispatcher.clone()).with_replay(
            storage.deferred.clone(),
            storage.publisher.clone(),
            storage.journal.clone(),
        ),
    );

    let mut background: Vec<JoinHandle<()>> = Vec::new();

    // Expired cooldown entries are dead weight
    let prune_every = config.sweep.cooldown().max(Duration::from_secs(1));
    background.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = cooldowns.prune(Utc::now());
            if removed > 0 {
                debug!(removed, remaining = cooldowns.len(), "Pruned cooldown entries");
            }
        }
    }));

    if let Some(secs) = config.storage.replay_interval_secs.filter(|s| *s > 0) {
        info!("Replaying deferred messages every {}s", secs);
        let deferred = storage.deferred.clone();
        let publisher = storage.publisher.clone();
        let journal = storage.journal.clone();
        background.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                deferred.replay(publisher.as_ref(), &journal).await;
            }
        }));
    }

    let consume = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    consumer.stop();
    if let Err(e) = consume.await {
        error!("Consumer task failed: {}", e);
    }
    for handle in background {
        handle.abort();
    }

    // Delayed sweeps go back to the queue instead of holding up the exit
    dispatcher.cancel_pending();
    tracker.close();
    info!(in_flight = tracker.len(), "Waiting for in-flight sweeps...");
    tracker.wait().await;

    info!("Balancer stopped");
    Ok(())
}

/// Resend deferred messages once and exit
pub async fn replay(config: &Config) -> Result<()> {
    let storage = Storage::open(config).await?;

    let summary = storage
        .deferred
        .replay(storage.publisher.as_ref(), &storage.journal)
        .await;

    println!("Replayed: {}", summary.replayed);
    println!("Failed:   {}", summary.failed);
    if summary.failed > 0 {
        anyhow::bail!(
            "{} deferred message(s) left in {}",
            summary.failed,
            storage.deferred.dir().display()
        );
    }
    Ok(())
}

/// Queue a sweep for every known address and configured token
pub async fn enqueue_all(config: &Config) -> Result<()> {
    let storage = Storage::open(config).await?;
    let accounts = AccountApiClient::new(&config.api)?;

    let tokens = if config.sweep.tokens.is_empty() {
        vec![config.sweep.native_symbol.clone()]
    } else {
        config.sweep.tokens.clone()
    };

    let summary = enqueue_requests(
        &accounts,
        storage.publisher.as_ref(),
        &storage.journal,
        &tokens,
    )
    .await?;

    println!("Enqueued: {}", summary.published);
    println!("Failed:   {}", summary.failed);
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct EnqueueSummary {
    published: usize,
    failed: usize,
}

async fn enqueue_requests(
    accounts: &dyn AccountApi,
    publisher: &dyn MessagePublisher,
    journal: &ErrorJournal,
    tokens: &[String],
) -> Result<EnqueueSummary> {
    let addresses = accounts.all_addresses().await?;
    info!(addresses = addresses.len(), tokens = ?tokens, "Enqueueing sweeps");

    let mut summary = EnqueueSummary::default();
    for address in &addresses {
        for token in tokens {
            let request = SweepRequest::new(address.as_str(), token.as_str());
            let payload = request.to_payload()?;
            match publisher.publish(&payload).await {
                Ok(()) => summary.published += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(step = %Step::Enqueue, address = %address, token = %token, "Enqueue failed: {}", e);
                    journal.record(Step::Enqueue, &e, Some(&payload)).await;
                }
            }
        }
    }

    Ok(summary)
}

/// Show configuration with secrets masked
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}
