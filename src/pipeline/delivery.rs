use std::fmt;

/// Broker-side facts about one delivery
///
/// Copied out of the broker's delivery so the processor never holds on to the
/// delivery itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// Channel-scoped token the disposition is sent back with
    pub delivery_tag: u64,

    /// Exchange the message was originally published to
    pub exchange: String,

    /// Routing key the message was originally published with
    pub routing_key: String,

    /// Whether the broker has delivered this message before
    pub redelivered: bool,
}

impl DeliveryMetadata {
    pub fn new(delivery_tag: u64, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
        }
    }

    /// Mark as a redelivery (builder pattern)
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }
}

/// What the consumer tells the broker about a delivery
///
/// Exactly one disposition is sent per delivery. Messages that can never be
/// processed are acknowledged after being copied to the dead-letter queue,
/// so rejecting without requeue is never needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Ack,

    /// Reject and ask the broker to deliver the message again
    Requeue,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Ack => write!(f, "ack"),
            Disposition::Requeue => write!(f, "requeue"),
        }
    }
}
