//! Dead-letter publishing
//!
//! Messages the pipeline cannot use are republished, byte for byte, to a
//! durable dead-letter queue so they can be inspected or replayed later. The
//! failure reason travels in message headers; the body is never touched.

use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use tracing::{debug, info};

use super::topology::QueueBinding;
use crate::pipeline::DeliveryMetadata;

/// Header carrying the reason the message was dead-lettered
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";
/// Header carrying the exchange the message was first published to
pub const ORIGINAL_EXCHANGE_HEADER: &str = "x-original-exchange";
/// Header carrying the routing key the message was first published with
pub const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";

const PERSISTENT: u8 = 2;

/// Errors that can occur while dead-lettering a message
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Failed to declare dead-letter topology: {0}")]
    Topology(String),

    #[error("Failed to publish to dead-letter queue: {0}")]
    PublishFailed(String),

    #[error("Broker refused dead-letter message")]
    Nacked,
}

/// Destination for messages the pipeline gives up on
#[async_trait]
pub trait DeadLetterSink: Send {
    /// Preserve `body` exactly as received, together with why it failed
    async fn publish(
        &mut self,
        body: &[u8],
        metadata: &DeliveryMetadata,
        reason: &str,
    ) -> Result<(), DeadLetterError>;
}

/// Dead-letter publisher over an AMQP channel
///
/// The dead-letter exchange, queue and binding are declared before the
/// first publish on the channel. When the channel is in confirm mode every
/// publish waits for the broker's acknowledgement.
pub struct AmqpDeadLetterPublisher {
    channel: Channel,
    binding: QueueBinding,
    topology_declared: bool,
}

impl AmqpDeadLetterPublisher {
    pub fn new(channel: Channel, binding: QueueBinding) -> Self {
        Self {
            channel,
            binding,
            topology_declared: false,
        }
    }

    async fn ensure_topology(&mut self) -> Result<(), DeadLetterError> {
        if !self.topology_declared {
            self.binding
                .declare(&self.channel)
                .await
                .map_err(|e| DeadLetterError::Topology(e.to_string()))?;
            self.topology_declared = true;
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for AmqpDeadLetterPublisher {
    async fn publish(
        &mut self,
        body: &[u8],
        metadata: &DeliveryMetadata,
        reason: &str,
    ) -> Result<(), DeadLetterError> {
        self.ensure_topology().await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_headers(failure_headers(metadata, reason));

        let confirmation = self
            .channel
            .basic_publish(
                &self.binding.exchange,
                &self.binding.routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| DeadLetterError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| DeadLetterError::PublishFailed(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(DeadLetterError::Nacked);
        }

        info!(
            exchange = %self.binding.exchange,
            delivery_tag = metadata.delivery_tag,
            bytes = body.len(),
            reason,
            "Message dead-lettered"
        );
        debug!(?confirmation, "Dead-letter publish confirmed");
        Ok(())
    }
}

/// Headers attached to a dead-lettered message
pub fn failure_headers(metadata: &DeliveryMetadata, reason: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(FAILURE_REASON_HEADER),
        AMQPValue::LongString(LongString::from(reason)),
    );
    headers.insert(
        ShortString::from(ORIGINAL_EXCHANGE_HEADER),
        AMQPValue::LongString(LongString::from(metadata.exchange.as_str())),
    );
    headers.insert(
        ShortString::from(ORIGINAL_ROUTING_KEY_HEADER),
        AMQPValue::LongString(LongString::from(metadata.routing_key.as_str())),
    );
    headers
}
