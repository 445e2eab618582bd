//! Queue consumer
//!
//! Keeps a broker connection alive, pulls sweep requests and hands each one
//! to its own task. The consume loop never waits for a sweep to finish, so a
//! slow top-up or a hung node call only stalls that one sweep.

use async_trait::async_trait;
use backoff::backoff::Constant;
use backoff::future::retry_notify;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::message::SweepRequest;
use super::producer::{declare_queue, MessagePublisher};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::recovery::{DeferredStore, ErrorJournal, ReplaySummary};
use crate::sweep::{RateLimiter, Step, SweepPipeline};

/// Acknowledges one delivery
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    async fn acknowledge(&self) -> Result<()>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn acknowledge(&self) -> Result<()> {
        self.ack(BasicAckOptions::default()).await?;
        Ok(())
    }
}

/// Acknowledges its delivery exactly once
///
/// Call [`AckGuard::complete`] when processing is done. If the guard is
/// dropped first (an early return or a panic unwinding through the handler),
/// the ack is sent from a spawned task instead.
pub struct AckGuard<A: Acknowledge> {
    acker: Option<A>,
}

impl<A: Acknowledge> AckGuard<A> {
    pub fn new(acker: A) -> Self {
        Self { acker: Some(acker) }
    }

    pub async fn complete(mut self) -> Result<()> {
        match self.acker.take() {
            Some(acker) => acker.acknowledge().await,
            None => Ok(()),
        }
    }
}

impl<A: Acknowledge> Drop for AckGuard<A> {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            warn!("Delivery handler exited early, acknowledging from drop");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = acker.acknowledge().await {
                            error!(step = %Step::Ack, "Failed to acknowledge delivery: {}", e);
                        }
                    });
                }
                Err(_) => error!(step = %Step::Ack, "No runtime to acknowledge delivery"),
            }
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A sweep task was spawned, optionally held back by the rate limiter
    Scheduled { delay: Option<Duration> },
    /// Undecodable; acknowledged and discarded
    Dropped,
}

/// Turns message bodies into spawned sweep tasks
pub struct SweepDispatcher {
    limiter: Arc<RateLimiter>,
    pipeline: Arc<SweepPipeline>,
    journal: Arc<ErrorJournal>,
    tracker: TaskTracker,
    delay_threshold: Duration,
    /// Cancels sweeps still waiting out their cooldown delay
    pending: CancellationToken,
}

impl SweepDispatcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        pipeline: Arc<SweepPipeline>,
        journal: Arc<ErrorJournal>,
        tracker: TaskTracker,
        delay_threshold: Duration,
    ) -> Self {
        Self {
            limiter,
            pipeline,
            journal,
            tracker,
            delay_threshold,
            pending: CancellationToken::new(),
        }
    }

    /// Hand every sweep still waiting on its delay back to the queue
    ///
    /// Sweeps already running are left to finish.
    pub fn cancel_pending(&self) {
        self.pending.cancel();
    }

    /// Process one delivery and acknowledge it, whatever the outcome
    pub async fn handle<A: Acknowledge>(&self, body: &[u8], acker: A) -> Dispatch {
        let guard = AckGuard::new(acker);
        let dispatch = self.dispatch(body).await;
        if let Err(e) = guard.complete().await {
            error!(step = %Step::Ack, "Failed to acknowledge delivery: {}", e);
        }
        dispatch
    }

    pub async fn dispatch(&self, body: &[u8]) -> Dispatch {
        let request = match SweepRequest::decode(body) {
            Ok(request) => request,
            Err(e) => {
                error!(
                    step = %Step::Decode,
                    body = %String::from_utf8_lossy(&body[..body.len().min(200)]),
                    "Dropping message: {}",
                    e
                );
                self.journal.record(Step::Decode, &e, Some(body)).await;
                return Dispatch::Dropped;
            }
        };

        info!(address = %request.address, token = %request.token, "Received sweep request");

        let admission = self.limiter.can_go(&request.address).await;
        let delay = admission.delay(self.delay_threshold);
        if let Some(delay) = delay {
            info!(address = %request.address, delay_secs = delay.as_secs(), "Delaying sweep");
        }

        let pipeline = self.pipeline.clone();
        let pending = self.pending.clone();
        self.tracker.spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = pending.cancelled() => {
                        info!(address = %request.address, "Delayed sweep cancelled, returning it to the queue");
                        pipeline.recovery().hand_back(&request).await;
                        return;
                    }
                }
            }
            pipeline.run(&request).await;
        });

        Dispatch::Scheduled { delay }
    }
}

/// Deferred messages to resend whenever the broker connection comes up
struct ConnectReplay {
    deferred: Arc<DeferredStore>,
    publisher: Arc<dyn MessagePublisher>,
    journal: Arc<ErrorJournal>,
}

/// Broker consume loop
pub struct QueueConsumer {
    config: BrokerConfig,
    dispatcher: Arc<SweepDispatcher>,
    shutdown: broadcast::Sender<()>,
    replay: Option<ConnectReplay>,
    attempts: AtomicUsize,
}

impl QueueConsumer {
    pub fn new(config: BrokerConfig, dispatcher: Arc<SweepDispatcher>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            dispatcher,
            shutdown,
            replay: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Replay the deferred store each time a connection is established
    pub fn with_replay(
        mut self,
        deferred: Arc<DeferredStore>,
        publisher: Arc<dyn MessagePublisher>,
        journal: Arc<ErrorJournal>,
    ) -> Self {
        self.replay = Some(ConnectReplay {
            deferred,
            publisher,
            journal,
        });
        self
    }

    /// Broker connection attempts so far
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Kick off a deferred replay in the background, if configured
    fn on_connected(&self) -> Option<JoinHandle<ReplaySummary>> {
        let replay = self.replay.as_ref()?;
        let deferred = replay.deferred.clone();
        let publisher = replay.publisher.clone();
        let journal = replay.journal.clone();
        Some(tokio::spawn(async move {
            deferred.replay(publisher.as_ref(), &journal).await
        }))
    }

    /// Stop the consume loop
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Consume until [`QueueConsumer::stop`] is called, reconnecting forever
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Consumer shutting down");
                    return;
                }
                result = self.connect_and_consume() => {
                    match result {
                        Err(e) if e.is_connection_refused() => {
                            debug!("Broker refused connection: {}", e);
                        }
                        Err(e) => {
                            error!(step = %Step::Consume, "Consumer stopped: {}", e);
                        }
                        Ok(()) => {}
                    }
                }
            }

            warn!("Reconnecting in {:?}...", delay);
            sleep(delay).await;
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let url = self.config.url.as_str();
        let attempts = &self.attempts;
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);

        retry_notify(
            Constant::new(delay),
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Connection::connect(url, ConnectionProperties::default())
                    .await
                    .map_err(|e| backoff::Error::transient(Error::from(e)))
            },
            |e: Error, wait: Duration| {
                if !e.is_connection_refused() {
                    warn!(step = %Step::Connect, "Broker connection failed: {}", e);
                }
                info!("Waiting {:?} to connect to the broker", wait);
            },
        )
        .await
    }

    async fn connect_and_consume(&self) -> Result<()> {
        let connection = self.connect().await?;
        let channel = connection.create_channel().await?;
        declare_queue(&channel, &self.config.queue).await?;

        let mut consumer = channel
            .basic_consume(
                &self.config.queue,
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        info!(queue = %self.config.queue, "Connected to broker, consuming");
        self.on_connected();

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.dispatcher
                .handle(&delivery.data, delivery.acker.clone())
                .await;
        }

        Err(Error::ConsumerClosed)
    }
}
