//! Service configuration.
//!
//! Settings live in a TOML file (default `./nowcast.toml`, overridable with
//! `NOWCAST_CONFIG`). Every field has a default, so a missing file is not an
//! error. The KMA service key is a credential and is only ever read from the
//! environment (`KMA_SERVICE_KEY`, optionally via `.env`).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::alert::trigger::DEFAULT_HEARTBEAT;

pub const CONFIG_PATH_ENV: &str = "NOWCAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./nowcast.toml";
pub const SERVICE_KEY_ENV: &str = "KMA_SERVICE_KEY";

pub const KMA_NOWCAST_URL: &str =
    "https://apis.data.go.kr/1360000/VilageFcstInfoService_2.0/getUltraSrtNcst";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} is not set; put the KMA service key in the environment or .env")]
    MissingServiceKey(&'static str),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kma: KmaConfig,
    pub serial: SerialConfig,
    pub obslog: ObsLogConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KmaConfig {
    pub base_url: String,
    /// KMA forecast grid x.
    pub nx: u32,
    /// KMA forecast grid y.
    pub ny: u32,
    pub num_of_rows: u32,
    pub timeout_secs: u64,
    /// Retries after the first attempt for 5xx and transport failures.
    pub max_retries: u32,
    /// Delay before retry n is `backoff_secs * 2^(n-1)`.
    pub backoff_secs: f64,
}

impl Default for KmaConfig {
    fn default() -> Self {
        Self {
            base_url: KMA_NOWCAST_URL.to_string(),
            nx: 61,
            ny: 127,
            num_of_rows: 60,
            timeout_secs: 30,
            max_retries: 3,
            backoff_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit device path; when unset, ports are discovered.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Wait after opening for the microcontroller to reset.
    pub settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObsLogConfig {
    pub path: PathBuf,
}

impl Default for ObsLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("nowcast_log.csv"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Nowcast logging plus sensor fusion and risk transmission.
    #[default]
    Monitor,
    /// Nowcast logging only, on a slow tick, without a serial link.
    Collector,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub mode: Mode,
    /// Loop period; defaults to 1 s in monitor mode and 60 s in collector mode.
    pub tick_secs: Option<u64>,
    pub heartbeat_secs: Option<u64>,
}

impl ControlConfig {
    pub fn tick(&self) -> Duration {
        let default = match self.mode {
            Mode::Monitor => 1,
            Mode::Collector => 60,
        };
        Duration::from_secs(self.tick_secs.unwrap_or(default))
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HEARTBEAT)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "nowcast_flood_service=debug".
    pub level: String,
    /// Optional file that receives a copy of every log line.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses a config document. Absent sections and fields take defaults.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the config file at `path`, or all defaults if it does not exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text, path)
}

/// Config path from `NOWCAST_CONFIG`, falling back to `./nowcast.toml`.
pub fn config_path_from_env() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Reads the KMA service key from the environment, loading `.env` first.
pub fn service_key_from_env() -> Result<String, ConfigError> {
    dotenv::dotenv().ok();
    env::var(SERVICE_KEY_ENV)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or(ConfigError::MissingServiceKey(SERVICE_KEY_ENV))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
