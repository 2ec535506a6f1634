//! Append-only CSV log of fetched nowcast observations.
//!
//! One row per publication key. The header is written when the file is
//! created (or found empty). The log is also the source of the rainfall rate
//! the risk engine uses: the latest row's `rainfall_mm`, read back from disk.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::logging::{self, Component};
use crate::model::{ObsLogError, Observation, PublicationKey, RainfallRate};

pub const COLUMN_BASE_DATE: &str = "base_date";
pub const COLUMN_BASE_TIME: &str = "base_time";
pub const COLUMN_RAINFALL: &str = "rainfall_mm";

/// One line of the log. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRow {
    /// Capture time, ISO 8601 at second precision.
    pub timestamp: String,
    pub base_date: String,
    pub base_time: String,
    pub nx: u32,
    pub ny: u32,
    pub temperature_c: f64,
    pub rainfall_mm: f64,
    pub humidity_pct: f64,
    pub wind_speed_ms: f64,
}

impl ObservationRow {
    pub fn from_observation(obs: &Observation, nx: u32, ny: u32) -> Self {
        Self {
            timestamp: obs.captured_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
            base_date: obs.key.base_date.clone(),
            base_time: obs.key.base_time.clone(),
            nx,
            ny,
            temperature_c: obs.temperature_c,
            rainfall_mm: obs.rainfall_mm,
            humidity_pct: obs.humidity_pct,
            wind_speed_ms: obs.wind_speed_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservationLog {
    path: PathBuf,
    nx: u32,
    ny: u32,
}

impl ObservationLog {
    pub fn new(path: impl Into<PathBuf>, nx: u32, ny: u32) -> Self {
        Self {
            path: path.into(),
            nx,
            ny,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_empty_or_missing(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true)
    }

    /// Appends one observation, writing the header first on a fresh file.
    pub fn append(&self, obs: &Observation) -> Result<ObservationRow, ObsLogError> {
        let write_header = self.is_empty_or_missing();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let row = ObservationRow::from_observation(obs, self.nx, self.ny);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(&row)?;
        writer.flush()?;
        Ok(row)
    }

    /// Last data row as a raw record plus the header, if the log has one.
    fn last_record(&self) -> Result<Option<(csv::StringRecord, csv::StringRecord)>, ObsLogError> {
        if self.is_empty_or_missing() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(File::open(&self.path)?);
        let headers = reader.headers()?.clone();

        let mut last = None;
        for record in reader.records() {
            last = Some(record?);
        }
        Ok(last.map(|record| (headers, record)))
    }

    /// Rainfall of the most recent row.
    ///
    /// An absent or empty log, a missing column, or an unparseable value all
    /// read as 0.0 mm/h.
    pub fn latest_rainfall(&self) -> RainfallRate {
        let (headers, record) = match self.last_record() {
            Ok(Some(found)) => found,
            Ok(None) => return RainfallRate::default(),
            Err(e) => {
                let path = self.path.display().to_string();
                logging::error(Component::ObsLog, Some(&path), &format!("read failed: {}", e));
                return RainfallRate::default();
            }
        };

        headers
            .iter()
            .position(|h| h == COLUMN_RAINFALL)
            .and_then(|idx| record.get(idx))
            .and_then(|value| value.trim().parse::<f64>().ok())
            .map(RainfallRate::new)
            .unwrap_or_default()
    }

    /// Publication key of the most recent row, so a restart does not log the
    /// current window twice.
    pub fn last_key(&self) -> Option<PublicationKey> {
        let (headers, record) = self.last_record().ok().flatten()?;
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|idx| record.get(idx))
                .map(str::to_string)
        };
        Some(PublicationKey::new(
            column(COLUMN_BASE_DATE)?,
            column(COLUMN_BASE_TIME)?,
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// A fresh log path under the system temp dir, unique per test.
    fn temp_log(name: &str) -> ObservationLog {
        let path = std::env::temp_dir().join(format!(
            "nowcast_obslog_{}_{}.csv",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        ObservationLog::new(path, 61, 127)
    }

    fn observation(base_time: &str, rainfall_mm: f64) -> Observation {
        Observation {
            key: PublicationKey::new("20240701", base_time),
            temperature_c: 23.1,
            rainfall_mm,
            humidity_pct: 94.0,
            wind_speed_ms: 3.4,
            captured_at: NaiveDate::from_ymd_opt(2024, 7, 1)
                .unwrap()
                .and_hms_opt(14, 45, 12)
                .unwrap(),
        }
    }

    #[test]
    fn test_missing_log_reads_zero_rainfall() {
        let log = temp_log("missing");
        assert_eq!(log.latest_rainfall().mm_per_hour(), 0.0);
        assert_eq!(log.last_key(), None);
    }

    #[test]
    fn test_header_written_once() {
        let log = temp_log("header");
        log.append(&observation("1400", 1.5)).unwrap();
        log.append(&observation("1430", 2.5)).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "header plus two rows, got:\n{}", text);
        assert_eq!(
            lines[0],
            "timestamp,base_date,base_time,nx,ny,temperature_c,rainfall_mm,humidity_pct,wind_speed_ms"
        );
        assert!(lines[1].starts_with("2024-07-01T14:45:12,20240701,1400,61,127,"));
        let _ = fs::remove_file(log.path());
    }

    #[test]
    fn test_latest_rainfall_reads_last_row() {
        let log = temp_log("latest");
        log.append(&observation("1400", 12.0)).unwrap();
        log.append(&observation("1430", 41.5)).unwrap();
        assert_eq!(log.latest_rainfall().mm_per_hour(), 41.5);
        assert_eq!(log.last_key(), Some(PublicationKey::new("20240701", "1430")));
        let _ = fs::remove_file(log.path());
    }

    #[test]
    fn test_empty_file_reads_zero_rainfall() {
        let log = temp_log("empty");
        File::create(log.path()).unwrap();
        assert_eq!(log.latest_rainfall().mm_per_hour(), 0.0);
        let _ = fs::remove_file(log.path());
    }

    #[test]
    fn test_header_only_reads_zero_rainfall() {
        let log = temp_log("header_only");
        fs::write(
            log.path(),
            "timestamp,base_date,base_time,nx,ny,temperature_c,rainfall_mm,humidity_pct,wind_speed_ms\n",
        )
        .unwrap();
        assert_eq!(log.latest_rainfall().mm_per_hour(), 0.0);
        let _ = fs::remove_file(log.path());
    }

    #[test]
    fn test_unparseable_rainfall_reads_zero() {
        let log = temp_log("garbage");
        fs::write(
            log.path(),
            "timestamp,base_date,base_time,nx,ny,temperature_c,rainfall_mm,humidity_pct,wind_speed_ms\n\
             2024-07-01T14:45:12,20240701,1400,61,127,23.1,,94,3.4\n",
        )
        .unwrap();
        assert_eq!(log.latest_rainfall().mm_per_hour(), 0.0);
        let _ = fs::remove_file(log.path());
    }
}
