use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Reading as it arrives on the wire, before validation
///
/// Every field is kept as a raw JSON value so the validator can tell a missing
/// field apart from one of the wrong type. A JSON `null` is treated as missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_station: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dates: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<Value>,
}

impl RawReading {
    /// Decode a raw message body into a reading
    ///
    /// The body must be a UTF-8 JSON object. Unknown keys are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use weather_ingest::reading::RawReading;
    ///
    /// let raw = RawReading::decode(br#"{"id_station": 1, "wind": "N"}"#).unwrap();
    /// assert_eq!(raw.id_station.unwrap(), 1);
    /// assert!(raw.pressure.is_none());
    ///
    /// assert!(RawReading::decode(b"[1, 2, 3]").is_err());
    /// ```
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).map_err(DecodeError::from)
    }
}

/// The message body could not be parsed as a JSON object
#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

/// Compass point reported by a station's wind vane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindDirection {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl WindDirection {
    pub const ALL: [WindDirection; 8] = [
        WindDirection::N,
        WindDirection::S,
        WindDirection::E,
        WindDirection::W,
        WindDirection::NE,
        WindDirection::NW,
        WindDirection::SE,
        WindDirection::SW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindDirection::N => "N",
            WindDirection::S => "S",
            WindDirection::E => "E",
            WindDirection::W => "W",
            WindDirection::NE => "NE",
            WindDirection::NW => "NW",
            WindDirection::SE => "SE",
            WindDirection::SW => "SW",
        }
    }
}

impl FromStr for WindDirection {
    type Err = ();

    /// Case-insensitive; surrounding whitespace is not accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|direction| direction.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for WindDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading that passed validation and may be persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Station catalog id (1-9999)
    pub id_station: i32,

    /// Observation time, normalized to UTC
    pub dates: DateTime<Utc>,

    /// Air temperature in degrees Celsius
    pub temperature_celsius: f64,

    /// Relative humidity in percent
    pub humidity: f64,

    pub wind: WindDirection,

    /// Wind speed in km/h
    pub wind_speed: f64,

    /// Barometric pressure in hPa
    pub pressure: f64,
}
