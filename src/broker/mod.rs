//! RabbitMQ side of the pipeline
//!
//! - `BrokerConfig` and `Topology`: where to connect and what to declare
//! - `ConsumerRuntime`: the reconnecting consume loop
//! - `AmqpDeadLetterPublisher`: republishes rejected messages to the DLQ

pub mod config;
pub mod dead_letter;
pub mod runtime;
pub mod topology;

pub use config::BrokerConfig;
pub use dead_letter::{AmqpDeadLetterPublisher, DeadLetterError, DeadLetterSink};
pub use runtime::{ConsumerRuntime, RuntimeError, RuntimeEvent, RuntimeState, PREFETCH_COUNT};
pub use topology::{QueueBinding, Topology};
