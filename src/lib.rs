//! Weather telemetry ingestion
//!
//! Readings arrive as JSON on a RabbitMQ queue, are validated, and are
//! written to PostgreSQL. Messages that can never be stored are copied to a
//! dead-letter queue; messages that fail only because the database is
//! unavailable are left for redelivery.

pub mod broker;
pub mod config;
pub mod pipeline;
pub mod reading;
pub mod storage;
pub mod telemetry;
