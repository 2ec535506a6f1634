//! KMA (Korea Meteorological Administration) Ultra-Short-Term Nowcast Client
//!
//! Retrieves the latest observed nowcast (temperature, one-hour rainfall,
//! humidity, wind speed) for one forecast grid cell from the public data
//! portal's `getUltraSrtNcst` endpoint.
//!
//! Observations are published every 30 minutes (base times HH00 and HH30) and
//! become available roughly 40 minutes after their base time.

use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::Deserialize;

use crate::config::KmaConfig;
use crate::ingest::ForecastSource;
use crate::logging::{self, Component};
use crate::model::{
    CATEGORY_HUMIDITY, CATEGORY_RAINFALL, CATEGORY_TEMPERATURE, CATEGORY_WIND_SPEED, FetchError,
    Observation, PublicationKey,
};

/// Minutes between a base time and the observation being available.
pub const PUBLICATION_LAG_MINUTES: i64 = 40;

/// KMA result code for success.
pub const RESULT_OK: &str = "00";

/// Rainfall value KMA reports as text when it is not raining.
const NO_PRECIPITATION: &str = "강수없음";

// ============================================================================
// KMA API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NowcastEnvelope {
    pub response: NowcastResponse,
}

#[derive(Debug, Deserialize)]
pub struct NowcastResponse {
    pub header: NowcastHeader,
    /// Absent when the header carries an error code.
    pub body: Option<NowcastBody>,
}

#[derive(Debug, Deserialize)]
pub struct NowcastHeader {
    #[serde(rename = "resultCode")]
    pub result_code: String,
    #[serde(rename = "resultMsg", default)]
    pub result_msg: String,
}

#[derive(Debug, Deserialize)]
pub struct NowcastBody {
    pub items: NowcastItems,
}

#[derive(Debug, Deserialize)]
pub struct NowcastItems {
    pub item: Vec<NowcastItem>,
}

/// One category/value pair. `obsrValue` is usually a string ("12.3") but is
/// accepted as a number too.
#[derive(Debug, Deserialize)]
pub struct NowcastItem {
    pub category: String,
    #[serde(rename = "obsrValue")]
    pub obsr_value: serde_json::Value,
}

// ============================================================================
// Publication window
// ============================================================================

/// Publication key of the most recent observation available at `now`.
///
/// Steps back by the publication lag, then floors the minute to 00 or 30.
pub fn latest_publication_at(now: NaiveDateTime) -> PublicationKey {
    let base = now - chrono::Duration::minutes(PUBLICATION_LAG_MINUTES);
    let minute = if base.minute() < 30 { 0 } else { 30 };
    PublicationKey::new(
        base.format("%Y%m%d").to_string(),
        format!("{:02}{:02}", base.hour(), minute),
    )
}

/// Convenience wrapper that uses the local wall clock.
pub fn latest_publication() -> PublicationKey {
    latest_publication_at(Local::now().naive_local())
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parses a `getUltraSrtNcst` JSON body into an observation for `key`.
pub fn parse_nowcast_response(
    body: &str,
    key: &PublicationKey,
    captured_at: NaiveDateTime,
) -> Result<Observation, FetchError> {
    let envelope: NowcastEnvelope =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    let response = envelope.response;

    if response.header.result_code != RESULT_OK {
        return Err(FetchError::Api {
            code: response.header.result_code,
            message: response.header.result_msg,
        });
    }

    let items = response
        .body
        .map(|b| b.items.item)
        .ok_or_else(|| FetchError::Parse("response has no body".to_string()))?;

    Ok(Observation {
        key: key.clone(),
        temperature_c: pick(&items, CATEGORY_TEMPERATURE)?,
        rainfall_mm: pick(&items, CATEGORY_RAINFALL)?,
        humidity_pct: pick(&items, CATEGORY_HUMIDITY)?,
        wind_speed_ms: pick(&items, CATEGORY_WIND_SPEED)?,
        captured_at,
    })
}

/// Value of the first item with the given category.
fn pick(items: &[NowcastItem], category: &'static str) -> Result<f64, FetchError> {
    let item = items
        .iter()
        .find(|it| it.category == category)
        .ok_or(FetchError::MissingCategory(category))?;

    let value = match &item.obsr_value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if s.trim() == NO_PRECIPITATION => Some(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    value.ok_or_else(|| {
        FetchError::Parse(format!(
            "{} has non-numeric value {}",
            category, item.obsr_value
        ))
    })
}

// ============================================================================
// Retry policy
// ============================================================================

/// Gateway and server errors that are worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

/// Delay before retry number `retry` (1-based): `backoff_secs * 2^(retry-1)`.
/// Saturates at `Duration::MAX` for delays too large to represent.
pub fn backoff_delay(backoff_secs: f64, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = (backoff_secs * 2f64.powi(exponent)).max(0.0);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

// ============================================================================
// API Client
// ============================================================================

/// Blocking client for the nowcast endpoint.
pub struct KmaClient {
    http: reqwest::blocking::Client,
    config: KmaConfig,
    service_key: String,
}

impl KmaClient {
    pub fn new(config: KmaConfig, service_key: String) -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            service_key,
        })
    }

    fn query(&self, key: &PublicationKey) -> Vec<(&'static str, String)> {
        vec![
            ("serviceKey", self.service_key.clone()),
            ("pageNo", "1".to_string()),
            ("numOfRows", self.config.num_of_rows.to_string()),
            ("dataType", "JSON".to_string()),
            ("base_date", key.base_date.clone()),
            ("base_time", key.base_time.clone()),
            ("nx", self.config.nx.to_string()),
            ("ny", self.config.ny.to_string()),
        ]
    }

    /// GET with retries on 5xx gateway errors and transport failures.
    fn get_with_retry(&self, key: &PublicationKey) -> Result<String, FetchError> {
        let query = self.query(key);
        let key_str = key.to_string();
        let mut retry = 0;

        loop {
            let failure = match self.http.get(&self.config.base_url).query(&query).send() {
                Ok(response) if response.status().is_success() => {
                    // without_url: the URL carries the service key
                    return response
                        .text()
                        .map_err(|e| FetchError::Transport(e.without_url().to_string()));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !is_retryable_status(status) {
                        return Err(FetchError::HttpStatus(status));
                    }
                    FetchError::HttpStatus(status)
                }
                Err(e) => FetchError::Transport(e.without_url().to_string()),
            };

            if retry >= self.config.max_retries {
                return Err(failure);
            }
            retry += 1;
            let delay = backoff_delay(self.config.backoff_secs, retry);
            logging::warn(
                Component::Kma,
                Some(&key_str),
                &format!(
                    "{}; retry {}/{} in {:.1}s",
                    failure,
                    retry,
                    self.config.max_retries,
                    delay.as_secs_f64()
                ),
            );
            thread::sleep(delay);
        }
    }
}

impl ForecastSource for KmaClient {
    fn fetch(&mut self, key: &PublicationKey) -> Result<Observation, FetchError> {
        let body = self.get_with_retry(key)?;
        parse_nowcast_response(&body, key, Local::now().naive_local())
    }
}

// ============================================================================
// Tests
// ============================================================================
