//! Queue producer
//!
//! Publishes sweep requests back onto the balancer queue. Used by failure
//! recovery, deferred replay and the `enqueue-all` command.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// AMQP delivery mode for messages that survive a broker restart
const PERSISTENT: u8 = 2;

/// Something that can put a message body on the balancer queue
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one body; `Ok` only once the broker confirmed it
    async fn publish(&self, body: &[u8]) -> Result<()>;
}

/// Declare the balancer queue on a channel
pub(crate) async fn declare_queue(channel: &lapin::Channel, queue: &str) -> Result<lapin::Queue> {
    let queue = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(queue)
}

/// Publisher opening a short-lived connection per message
///
/// Publishing happens on the failure path, usually while the main consumer
/// connection is healthy, so a dedicated connection keeps the two independent.
pub struct AmqpPublisher {
    url: String,
    queue: String,
}

impl AmqpPublisher {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            url: config.url.clone(),
            queue: config.queue.clone(),
        }
    }

    async fn publish_on(&self, connection: &Connection, body: &[u8]) -> Result<()> {
        let channel = connection.create_channel().await?;
        declare_queue(&channel, &self.queue).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        let confirmation = channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(Error::PublishNacked(self.queue.clone()));
        }

        debug!(queue = %self.queue, bytes = body.len(), "Published message");
        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    async fn publish(&self, body: &[u8]) -> Result<()> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let result = self.publish_on(&connection, body).await;

        if let Err(e) = connection.close(200, "done").await {
            warn!("Failed to close publisher connection: {}", e);
        }

        result
    }
}
