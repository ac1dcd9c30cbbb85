//! Weather station readings
//!
//! - `RawReading`: the JSON payload as published by stations
//! - `validate`: turns a `RawReading` into a `Reading` or a `ValidationError`
//! - `Reading`: a validated reading, ready to be persisted
//! - `synthetic`: generated payloads for the demo producer

pub mod synthetic;
pub mod types;
pub mod validator;

pub use types::{DecodeError, RawReading, Reading, WindDirection};
pub use validator::{parse_timestamp, validate, ValidationError};
