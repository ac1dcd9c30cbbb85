use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ConfirmSelectOptions,
    },
    types::FieldTable,
    Connection, ConnectionProperties,
};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{config::BrokerConfig, dead_letter::AmqpDeadLetterPublisher};
use crate::pipeline::{DeliveryMetadata, Disposition, MessageProcessor};
use crate::storage::ReadingStore;

/// Unacknowledged deliveries the broker may hand over at once
///
/// Kept at one so each message is inserted and settled before the next one
/// arrives, which keeps the single database connection's transactions
/// strictly sequential.
pub const PREFETCH_COUNT: u16 = 1;

/// Errors that end a consumer session
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Connection or channel failure; the runtime reconnects
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Settings that can never work; retrying is pointless
    #[error("Invalid broker configuration: {0}")]
    Config(String),
}

impl RuntimeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RuntimeError::Broker(_))
    }
}

/// Lifecycle of the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Disconnected,
    Connecting,
    Consuming,
    ShuttingDown,
}

/// Inputs that move the consumer between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    Connect,
    SessionReady,
    ConnectionLost,
    Shutdown,
}

impl RuntimeState {
    /// Next state after `event`; `ShuttingDown` is terminal
    pub fn on(self, event: RuntimeEvent) -> RuntimeState {
        use RuntimeEvent::*;
        use RuntimeState::*;

        match (self, event) {
            (ShuttingDown, _) | (_, Shutdown) => ShuttingDown,
            (Disconnected, Connect) => Connecting,
            (Connecting, SessionReady) => Consuming,
            (Connecting | Consuming, ConnectionLost) => Disconnected,
            (state, _) => state,
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Disconnected => "disconnected",
            RuntimeState::Connecting => "connecting",
            RuntimeState::Consuming => "consuming",
            RuntimeState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// How a consumer session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    ConsumerClosed,
}

/// Consumes the main queue and feeds each delivery through the pipeline
///
/// The runtime owns one broker connection at a time. When the connection is
/// lost it waits `reconnect_delay` and starts over: connect, declare
/// topology, set prefetch, consume. Deliveries that were in flight when the
/// connection dropped are redelivered by the broker.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use weather_ingest::broker::{BrokerConfig, ConsumerRuntime};
/// use weather_ingest::storage::{DatabaseConfig, RetryPolicy, StorageGateway};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let gateway = StorageGateway::new(DatabaseConfig::default(), RetryPolicy::default());
///     let mut runtime = ConsumerRuntime::new(BrokerConfig::default(), Duration::from_secs(5), gateway);
///
///     let shutdown = CancellationToken::new();
///     runtime.run(shutdown).await?;
///     Ok(())
/// }
/// ```
pub struct ConsumerRuntime<S> {
    config: BrokerConfig,
    reconnect_delay: Duration,
    store: S,
    state: RuntimeState,
}

impl<S: ReadingStore> ConsumerRuntime<S> {
    pub fn new(config: BrokerConfig, reconnect_delay: Duration, store: S) -> Self {
        Self {
            config,
            reconnect_delay,
            store,
            state: RuntimeState::Disconnected,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Give back the store, e.g. to close it after shutdown
    pub fn into_store(self) -> S {
        self.store
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// Broker failures are retried forever with a fixed delay. Only invalid
    /// configuration makes this return an error. A message being processed
    /// when shutdown is requested is finished and settled first.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        self.config.validate().map_err(RuntimeError::Config)?;

        while !shutdown.is_cancelled() {
            self.transition(RuntimeEvent::Connect);

            match self.session(&shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::ConsumerClosed) => {
                    warn!("Broker closed the consumer");
                }
                Err(e) if e.is_recoverable() => {
                    error!(error = %e, "Lost connection to broker");
                }
                Err(e) => {
                    self.transition(RuntimeEvent::Shutdown);
                    return Err(e);
                }
            }

            self.transition(RuntimeEvent::ConnectionLost);
            info!(delay = ?self.reconnect_delay, "Reconnecting to broker");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.transition(RuntimeEvent::Shutdown);
        info!("Consumer stopped");
        Ok(())
    }

    fn transition(&mut self, event: RuntimeEvent) {
        let next = self.state.on(event);
        if next != self.state {
            debug!(from = %self.state, to = %next, ?event, "Consumer state change");
            self.state = next;
        }
    }

    /// One connection's worth of consuming
    async fn session(&mut self, shutdown: &CancellationToken) -> Result<SessionEnd, RuntimeError> {
        let topology = self.config.topology.clone();

        info!(broker = %self.config, "Connecting to broker");
        let properties = ConnectionProperties::default().with_connection_name("weather-consumer".into());
        // The AMQP handshake has no timeout of its own
        let connection = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            connection = Connection::connect_uri(self.config.amqp_uri(), properties) => connection?,
        };

        let channel = connection.create_channel().await?;
        topology.main.declare(&channel).await?;
        topology.dead_letter.declare(&channel).await?;
        channel.basic_qos(PREFETCH_COUNT, BasicQosOptions::default()).await?;

        // Dead letters go out on their own channel so publisher confirms do
        // not interfere with consumer acks
        let dead_letter_channel = connection.create_channel().await?;
        dead_letter_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        let mut dead_letters = AmqpDeadLetterPublisher::new(dead_letter_channel, topology.dead_letter.clone());

        let consumer_tag = format!("weather-consumer-{}", Uuid::new_v4());
        let mut consumer = channel
            .basic_consume(
                &topology.main.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.transition(RuntimeEvent::SessionReady);
        info!(
            queue = %topology.main.queue,
            prefetch = PREFETCH_COUNT,
            consumer_tag = %consumer_tag,
            "Waiting for messages"
        );

        let mut processor = MessageProcessor::new(&mut self.store, &mut dead_letters);

        let end = loop {
            // Shutdown is only observed between messages
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Some(delivery) => delivery?,
                None => break SessionEnd::ConsumerClosed,
            };

            let metadata = metadata_of(&delivery);
            let outcome = processor.process(&delivery.data, &metadata).await;
            settle(&delivery, outcome.disposition()).await?;
        };

        if end == SessionEnd::Shutdown {
            info!("Shutdown requested, closing broker connection");
            if let Err(e) = channel.close(200, "consumer shutting down").await {
                warn!(error = %e, "Failed to close channel");
            }
            if let Err(e) = connection.close(200, "consumer shutting down").await {
                warn!(error = %e, "Failed to close connection");
            }
        }

        Ok(end)
    }
}

fn metadata_of(delivery: &Delivery) -> DeliveryMetadata {
    DeliveryMetadata::new(
        delivery.delivery_tag,
        delivery.exchange.as_str(),
        delivery.routing_key.as_str(),
    )
    .with_redelivered(delivery.redelivered)
}

/// Send the disposition for a delivery back to the broker
async fn settle(delivery: &Delivery, disposition: Disposition) -> Result<(), lapin::Error> {
    debug!(delivery_tag = delivery.delivery_tag, %disposition, "Settling delivery");

    match disposition {
        Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
        Disposition::Requeue => {
            delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await
        }
    }
}
