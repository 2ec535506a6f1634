//! Core data types for the nowcast flood alert service.
//!
//! This module defines the shared domain model imported by all other modules:
//! observations fetched from the KMA nowcast API, the water-level tier
//! reported by the microcontroller, and the fused risk level sent back to it.
//! It contains no I/O, only types and the error enums shared across modules.

use std::fmt;

use chrono::NaiveDateTime;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Nowcast categories
// ---------------------------------------------------------------------------

/// KMA category code for air temperature, in °C.
pub const CATEGORY_TEMPERATURE: &str = "T1H";

/// KMA category code for one-hour rainfall, in mm.
pub const CATEGORY_RAINFALL: &str = "RN1";

/// KMA category code for relative humidity, in percent.
pub const CATEGORY_HUMIDITY: &str = "REH";

/// KMA category code for wind speed, in m/s.
pub const CATEGORY_WIND_SPEED: &str = "WSD";

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// Identifies one nowcast issuance. Observations are fetched and logged at
/// most once per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicationKey {
    /// Publication date, `YYYYMMDD`.
    pub base_date: String,
    /// Publication time, `HHMM` (minutes are always `00` or `30`).
    pub base_time: String,
}

impl PublicationKey {
    pub fn new(base_date: impl Into<String>, base_time: impl Into<String>) -> Self {
        Self {
            base_date: base_date.into(),
            base_time: base_time.into(),
        }
    }
}

impl fmt::Display for PublicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_date, self.base_time)
    }
}

/// One nowcast observation for the configured grid point.
///
/// Immutable once written to the observation log.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: PublicationKey,
    pub temperature_c: f64,
    pub rainfall_mm: f64,
    pub humidity_pct: f64,
    pub wind_speed_ms: f64,
    /// Local wall-clock time the observation was captured.
    pub captured_at: NaiveDateTime,
}

/// Rainfall intensity in mm/hour. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct RainfallRate(f64);

impl RainfallRate {
    /// Negative and non-finite inputs collapse to 0.0.
    pub fn new(mm_per_hour: f64) -> Self {
        if mm_per_hour.is_finite() && mm_per_hour > 0.0 {
            RainfallRate(mm_per_hour)
        } else {
            RainfallRate(0.0)
        }
    }

    pub fn mm_per_hour(self) -> f64 {
        self.0
    }
}

impl fmt::Display for RainfallRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tier and risk
// ---------------------------------------------------------------------------

/// Water-level tier reported by the microcontroller's float sensors, in
/// ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SensorTier {
    None,
    Green,
    Yellow,
    Red,
}

impl SensorTier {
    pub const ALL: [SensorTier; 4] = [
        SensorTier::None,
        SensorTier::Green,
        SensorTier::Yellow,
        SensorTier::Red,
    ];
}

impl fmt::Display for SensorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorTier::None => write!(f, "NONE"),
            SensorTier::Green => write!(f, "GREEN"),
            SensorTier::Yellow => write!(f, "YELLOW"),
            SensorTier::Red => write!(f, "RED"),
        }
    }
}

/// Fused risk level, totally ordered SAFE < CAUTION < WARNING < DANGER.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Safe,
    Caution,
    Warning,
    Danger,
}

impl RiskLevel {
    /// Levels in ascending order; a level's position is its ordinal.
    pub const LEVELS: [RiskLevel; 4] = [
        RiskLevel::Safe,
        RiskLevel::Caution,
        RiskLevel::Warning,
        RiskLevel::Danger,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Indices past the top of the scale clamp to `Danger`.
    pub fn from_ordinal_clamped(index: usize) -> Self {
        Self::LEVELS[index.min(Self::LEVELS.len() - 1)]
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "SAFE"),
            RiskLevel::Caution => write!(f, "CAUTION"),
            RiskLevel::Warning => write!(f, "WARNING"),
            RiskLevel::Danger => write!(f, "DANGER"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching or decoding a KMA nowcast.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Non-2xx HTTP response, after retries were exhausted where applicable.
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    /// Connection, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body was not the JSON document we expect.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The API answered with a non-success result code.
    #[error("API result {code}: {message}")]
    Api { code: String, message: String },
    /// A required category was absent from the item list.
    #[error("category {0} missing from response")]
    MissingCategory(&'static str),
}

/// Errors from the CSV observation log.
#[derive(Debug, Error)]
pub enum ObsLogError {
    #[error("observation log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("observation log CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_levels_are_ordered() {
        assert!(RiskLevel::Safe < RiskLevel::Caution);
        assert!(RiskLevel::Caution < RiskLevel::Warning);
        assert!(RiskLevel::Warning < RiskLevel::Danger);
    }

    #[test]
    fn test_ordinal_clamps_at_danger() {
        assert_eq!(RiskLevel::from_ordinal_clamped(2), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_ordinal_clamped(3), RiskLevel::Danger);
        assert_eq!(RiskLevel::from_ordinal_clamped(5), RiskLevel::Danger);
    }

    #[test]
    fn test_rainfall_rate_rejects_negative_and_nan() {
        assert_eq!(RainfallRate::new(-3.0).mm_per_hour(), 0.0);
        assert_eq!(RainfallRate::new(f64::NAN).mm_per_hour(), 0.0);
        assert_eq!(RainfallRate::new(12.5).mm_per_hour(), 12.5);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(SensorTier::Yellow.to_string(), "YELLOW");
        assert_eq!(RiskLevel::Danger.to_string(), "DANGER");
        assert_eq!(RainfallRate::new(35.04).to_string(), "35.0");
        assert_eq!(PublicationKey::new("20240501", "1230").to_string(), "202405011230");
    }
}
