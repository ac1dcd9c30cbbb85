//! Message processing for the ingest pipeline
//!
//! This module provides:
//! - `MessageProcessor`: decides the fate of each delivery
//! - `ProcessOutcome`: what happened to a delivery and why
//! - `Disposition`: the single ack/requeue answer sent to the broker
//! - `DeliveryMetadata`: broker-side facts copied out of a delivery

pub mod delivery;
pub mod processor;

pub use delivery::{DeliveryMetadata, Disposition};
pub use processor::{Failure, MessageProcessor, ProcessOutcome};
