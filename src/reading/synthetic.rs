//! Generated readings for the demo producer and tests

use chrono::{Local, NaiveDateTime};
use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Value};

use super::types::WindDirection;

/// Stations the generator pretends to be
pub const SIMULATED_STATIONS: std::ops::RangeInclusive<i32> = 1..=5;

/// A plausible reading, stamped with the local wall clock
///
/// Timestamps are naive ISO strings, the form field gateways send when they
/// have no timezone configured.
pub fn random_reading<R: Rng + ?Sized>(rng: &mut R) -> Value {
    random_reading_at(rng, Local::now().naive_local())
}

pub fn random_reading_at<R: Rng + ?Sized>(rng: &mut R, at: NaiveDateTime) -> Value {
    let wind = WindDirection::ALL
        .choose(rng)
        .copied()
        .unwrap_or(WindDirection::N);

    json!({
        "id_station": rng.gen_range(SIMULATED_STATIONS),
        "dates": at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        "temperature_celsius": round2(rng.gen_range(-10.0..=60.0)),
        "humidity": round2(rng.gen_range(10.0..=100.0)),
        "wind": wind.as_str(),
        "wind_speed": round2(rng.gen_range(0.0..=100.0)),
        "pressure": round2(rng.gen_range(950.0..=1050.0)),
    })
}

/// The fixed smoke-test reading published by `PRODUCER_ONCE`
pub fn sample_reading() -> Value {
    json!({
        "id_station": 1,
        "dates": "2025-11-06T12:00:00Z",
        "temperature_celsius": 25.4,
        "humidity": 70.5,
        "wind": "N",
        "wind_speed": 3.5,
        "pressure": 1013.2,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
