//! Per-delivery state machine
//!
//! ```text
//! Received ──decode──▶ Decoded ──validate──▶ Validated ──insert──▶ Persisted ─▶ Ack
//!     │                    │                     │
//!     │ DecodeError        │ ValidationError     ├─ Permanent ─▶ DeadLettered ─▶ Ack
//!     └────────────────────┴─────────────────────┤
//!                                                └─ Transient ─▶ Requeue
//! ```
//!
//! Anything that would fail the same way on redelivery is copied to the
//! dead-letter queue and acknowledged. Only a transient storage failure leaves
//! the message for the broker to deliver again.

use tracing::{error, info, warn};

use crate::broker::dead_letter::DeadLetterSink;
use crate::pipeline::delivery::{DeliveryMetadata, Disposition};
use crate::reading::{validate, DecodeError, RawReading, ValidationError};
use crate::storage::{ReadingStore, StorageError};

/// Why a message was dead-lettered
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(StorageError),
}

/// Result of processing one delivery
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Stored as row `id`
    Persisted { id: i32 },

    /// Copied to the dead-letter queue (if `published`) and drained
    DeadLettered { failure: Failure, published: bool },

    /// Storage is temporarily unavailable; the broker should redeliver
    Retry { error: StorageError },
}

impl ProcessOutcome {
    /// The single disposition to send for this delivery
    pub fn disposition(&self) -> Disposition {
        match self {
            ProcessOutcome::Persisted { .. } | ProcessOutcome::DeadLettered { .. } => Disposition::Ack,
            ProcessOutcome::Retry { .. } => Disposition::Requeue,
        }
    }
}

/// Drives one delivery from raw bytes to a disposition
pub struct MessageProcessor<'a, S, D> {
    store: &'a mut S,
    dead_letters: &'a mut D,
}

impl<'a, S, D> MessageProcessor<'a, S, D>
where
    S: ReadingStore,
    D: DeadLetterSink,
{
    pub fn new(store: &'a mut S, dead_letters: &'a mut D) -> Self {
        Self { store, dead_letters }
    }

    /// Decode, validate and persist one message body
    ///
    /// Never fails: every error is folded into the returned outcome.
    pub async fn process(&mut self, body: &[u8], metadata: &DeliveryMetadata) -> ProcessOutcome {
        let raw = match RawReading::decode(body) {
            Ok(raw) => raw,
            Err(e) => return self.dead_letter(body, metadata, Failure::Decode(e)).await,
        };

        let reading = match validate(&raw) {
            Ok(reading) => reading,
            Err(e) => return self.dead_letter(body, metadata, Failure::Validation(e)).await,
        };

        match self.store.insert(&reading).await {
            Ok(id) => {
                info!(
                    id,
                    id_station = reading.id_station,
                    delivery_tag = metadata.delivery_tag,
                    "Reading persisted"
                );
                ProcessOutcome::Persisted { id }
            }
            Err(error) if error.is_transient() => {
                warn!(
                    %error,
                    delivery_tag = metadata.delivery_tag,
                    redelivered = metadata.redelivered,
                    "Storage unavailable, message will be redelivered"
                );
                ProcessOutcome::Retry { error }
            }
            Err(error) => self.dead_letter(body, metadata, Failure::Storage(error)).await,
        }
    }

    async fn dead_letter(
        &mut self,
        body: &[u8],
        metadata: &DeliveryMetadata,
        failure: Failure,
    ) -> ProcessOutcome {
        let reason = failure.to_string();
        warn!(
            reason = %reason,
            delivery_tag = metadata.delivery_tag,
            "Rejecting message"
        );

        // A lost dead letter must not keep the original in the main queue
        let published = match self.dead_letters.publish(body, metadata, &reason).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    delivery_tag = metadata.delivery_tag,
                    "Dead-letter publish failed; message will be dropped"
                );
                false
            }
        };

        ProcessOutcome::DeadLettered { failure, published }
    }
}
