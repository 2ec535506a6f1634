//! Structured logging for the nowcast flood alert service.
//!
//! Every line carries the component it came from and, where one exists, an
//! identifier (serial port path, publication key). Output goes to the console
//! and, optionally, to an append-only log file for unattended runs.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::alert::trigger::UpdateReason;
use crate::model::{FetchError, RainfallRate, RiskLevel, SensorTier};

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// KMA nowcast API.
    Kma,
    /// Microcontroller serial link.
    Serial,
    /// CSV observation log.
    ObsLog,
    /// Risk fusion and updates.
    Risk,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Kma => write!(f, "KMA"),
            Component::Serial => write!(f, "SERIAL"),
            Component::ObsLog => write!(f, "OBSLOG"),
            Component::Risk => write!(f, "RISK"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the publication is not out yet
    Expected,
    /// Unexpected failure - service degradation, bad key or API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// KMA result code for "no data", returned when a window is requested
/// before its observation has been published.
pub const KMA_NO_DATA: &str = "03";

pub fn classify_fetch_failure(err: &FetchError) -> FailureType {
    match err {
        FetchError::Api { code, .. } if code == KMA_NO_DATA => FailureType::Expected,
        FetchError::Api { .. } => FailureType::Unexpected,
        FetchError::HttpStatus(_) | FetchError::Parse(_) | FetchError::Transport(_) => {
            FailureType::Unexpected
        }
        FetchError::MissingCategory(_) => FailureType::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `level` is a `tracing` filter directive; `RUST_LOG` takes precedence when
/// set. An unparseable directive falls back to `info`. If `log_file` is given,
/// every line is also appended there without ANSI colors.
pub fn init_logger(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

fn id_part(id: Option<&str>) -> String {
    id.map(|s| format!(" [{}]", s)).unwrap_or_default()
}

/// Log a general informational message
pub fn info(component: Component, id: Option<&str>, message: &str) {
    tracing::info!(component = %component, "{}{}: {}", component, id_part(id), message);
}

/// Log a warning message
pub fn warn(component: Component, id: Option<&str>, message: &str) {
    tracing::warn!(component = %component, "{}{}: {}", component, id_part(id), message);
}

/// Log an error message
pub fn error(component: Component, id: Option<&str>, message: &str) {
    tracing::error!(component = %component, "{}{}: {}", component, id_part(id), message);
}

/// Log a debug message
pub fn debug(component: Component, id: Option<&str>, message: &str) {
    tracing::debug!(component = %component, "{}{}: {}", component, id_part(id), message);
}

// ---------------------------------------------------------------------------
// Structured Event Logging
// ---------------------------------------------------------------------------

/// Log a nowcast fetch failure with automatic classification
pub fn log_fetch_failure(key: &str, err: &FetchError) {
    let failure_type = classify_fetch_failure(err);
    let message = format!("fetch failed [{}]: {}", failure_type, err);

    match failure_type {
        FailureType::Expected => debug(Component::Kma, Some(key), &message),
        FailureType::Unexpected => error(Component::Kma, Some(key), &message),
        FailureType::Unknown => warn(Component::Kma, Some(key), &message),
    }
}

/// Log one risk update and the trigger that caused it
pub fn log_update(reason: UpdateReason, tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel) {
    let message = format!(
        "[{}] water level: {}, rainfall: {}mm/h, risk: {}",
        reason, tier, rainfall, risk
    );
    info(Component::Risk, None, &message);
}
