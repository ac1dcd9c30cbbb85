//! Field-by-field validation of incoming readings
//!
//! Fields are checked in declaration order and validation stops at the first
//! failure, so a reading with several bad fields reports only the first one.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::ops::RangeInclusive;

use super::types::{RawReading, Reading, WindDirection};

pub const STATION_ID_RANGE: RangeInclusive<i64> = 1..=9999;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -50.0..=70.0;
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;
pub const WIND_SPEED_RANGE: RangeInclusive<f64> = 0.0..=300.0;
pub const PRESSURE_RANGE: RangeInclusive<f64> = 300.0..=1200.0;

// ISO-8601 extended and basic forms
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y%m%d"];
const TIME_FORMATS: [&str; 4] = ["%H:%M:%S%.f", "%H:%M", "%H%M%S%.f", "%H%M"];
const DATE_TIME_SEPARATORS: [char; 2] = ['T', ' '];

/// Reason a reading was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' has the wrong type: expected {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' out of range: {value} not in {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("field '{field}' is not an ISO-8601 timestamp: {value:?}")]
    MalformedTimestamp { field: &'static str, value: String },

    #[error("field '{field}' has invalid value {value:?}; expected one of N, S, E, W, NE, NW, SE, SW")]
    InvalidEnum { field: &'static str, value: String },
}

impl ValidationError {
    /// Name of the field that failed
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::InvalidType { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::MalformedTimestamp { field, .. }
            | ValidationError::InvalidEnum { field, .. } => field,
        }
    }
}

/// Validate a decoded reading
///
/// # Example
///
/// ```
/// use weather_ingest::reading::{validate, RawReading, ValidationError};
///
/// let raw = RawReading::decode(br#"{
///     "id_station": 1, "dates": "2025-11-06T12:00:00Z", "temperature_celsius": 999,
///     "humidity": 70.5, "wind": "N", "wind_speed": 3.5, "pressure": 1013.2
/// }"#).unwrap();
///
/// let err = validate(&raw).unwrap_err();
/// assert_eq!(err.field(), "temperature_celsius");
/// assert!(matches!(err, ValidationError::OutOfRange { .. }));
/// ```
pub fn validate(raw: &RawReading) -> Result<Reading, ValidationError> {
    let id_station = station_id(raw.id_station.as_ref())?;
    let dates = timestamp("dates", raw.dates.as_ref())?;
    let temperature_celsius = number(
        "temperature_celsius",
        raw.temperature_celsius.as_ref(),
        TEMPERATURE_RANGE,
    )?;
    let humidity = number("humidity", raw.humidity.as_ref(), HUMIDITY_RANGE)?;
    let wind = wind_direction("wind", raw.wind.as_ref())?;
    let wind_speed = number("wind_speed", raw.wind_speed.as_ref(), WIND_SPEED_RANGE)?;
    let pressure = number("pressure", raw.pressure.as_ref(), PRESSURE_RANGE)?;

    Ok(Reading {
        id_station,
        dates,
        temperature_celsius,
        humidity,
        wind,
        wind_speed,
        pressure,
    })
}

fn required<'a>(field: &'static str, value: Option<&'a Value>) -> Result<&'a Value, ValidationError> {
    match value {
        Some(Value::Null) | None => Err(ValidationError::MissingField { field }),
        Some(value) => Ok(value),
    }
}

fn station_id(value: Option<&Value>) -> Result<i32, ValidationError> {
    const FIELD: &str = "id_station";

    let value = required(FIELD, value)?;
    let out_of_range = |value: f64| ValidationError::OutOfRange {
        field: FIELD,
        value,
        min: *STATION_ID_RANGE.start() as f64,
        max: *STATION_ID_RANGE.end() as f64,
    };

    let id = match (value.as_i64(), value.as_u64()) {
        (Some(id), _) => id,
        // Integer too large for i64
        (None, Some(id)) => return Err(out_of_range(id as f64)),
        (None, None) => {
            return Err(ValidationError::InvalidType {
                field: FIELD,
                expected: "integer",
            })
        }
    };

    if !STATION_ID_RANGE.contains(&id) {
        return Err(out_of_range(id as f64));
    }

    // Range check above keeps this lossless
    Ok(id as i32)
}

fn number(
    field: &'static str,
    value: Option<&Value>,
    range: RangeInclusive<f64>,
) -> Result<f64, ValidationError> {
    let value = required(field, value)?;
    let number = value.as_f64().ok_or(ValidationError::InvalidType {
        field,
        expected: "number",
    })?;

    if !range.contains(&number) {
        return Err(ValidationError::OutOfRange {
            field,
            value: number,
            min: *range.start(),
            max: *range.end(),
        });
    }

    Ok(number)
}

fn timestamp(field: &'static str, value: Option<&Value>) -> Result<DateTime<Utc>, ValidationError> {
    let value = required(field, value)?;
    let text = value.as_str().ok_or(ValidationError::InvalidType {
        field,
        expected: "string",
    })?;

    parse_timestamp(text).ok_or_else(|| ValidationError::MalformedTimestamp {
        field,
        value: text.to_string(),
    })
}

/// Parse an ISO-8601 timestamp
///
/// Accepts extended (`2025-11-06T12:00:00`) and basic (`20251106T120000`)
/// forms, a `T` or space separator, minute or second precision with optional
/// fraction, and bare dates (midnight). Offsets (`Z`, `+02`, `+0200`,
/// `+02:00`) are converted to UTC. Timestamps without an offset are taken as
/// UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
    {
        return date.and_hms_opt(0, 0, 0).map(|midnight| midnight.and_utc());
    }

    date_time_formats().find_map(|format| {
        DateTime::parse_from_str(text, &format!("{}%#z", format))
            .map(|parsed| parsed.with_timezone(&Utc))
            .or_else(|_| NaiveDateTime::parse_from_str(text, &format).map(|naive| naive.and_utc()))
            .ok()
    })
}

fn date_time_formats() -> impl Iterator<Item = String> {
    DATE_FORMATS.iter().flat_map(|date| {
        DATE_TIME_SEPARATORS.iter().flat_map(move |separator| {
            TIME_FORMATS
                .iter()
                .map(move |time| format!("{}{}{}", date, separator, time))
        })
    })
}

fn wind_direction(field: &'static str, value: Option<&Value>) -> Result<WindDirection, ValidationError> {
    let value = required(field, value)?;
    let text = value.as_str().ok_or(ValidationError::InvalidType {
        field,
        expected: "string",
    })?;

    text.parse().map_err(|_| ValidationError::InvalidEnum {
        field,
        value: text.to_string(),
    })
}
