use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind,
};
use tracing::debug;

/// A durable direct exchange bound to a durable queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl QueueBinding {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Declare the exchange, the queue and the binding between them
    ///
    /// Declarations are idempotent: re-declaring with the same arguments is a
    /// no-op on the broker, so producer and consumer can both call this.
    pub async fn declare(&self, channel: &Channel) -> Result<(), lapin::Error> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &self.queue,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(
            exchange = %self.exchange,
            queue = %self.queue,
            routing_key = %self.routing_key,
            "Declared topology"
        );
        Ok(())
    }
}

/// Main and dead-letter routing for the weather pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub main: QueueBinding,
    pub dead_letter: QueueBinding,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            main: QueueBinding::new("weather_exchange", "weather_queue", "weather.data"),
            dead_letter: QueueBinding::new("weather_dlq_exchange", "weather_dlq_queue", "weather.data"),
        }
    }
}
