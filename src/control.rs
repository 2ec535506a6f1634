//! The poll / fuse / transmit loop.
//!
//! Each tick:
//!   1. fetch and log the nowcast if its publication key is new
//!   2. drain the serial link for sensor changes
//!   3. ask the update policy whether a risk update is due
//!   4. if so, read rainfall back from the log, fuse, and transmit
//!
//! `tick` does the work and returns a `TickReport`; `run` logs the report,
//! sleeps, and repeats until shutdown. No step failure ends the loop.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::alert::risk::compute_risk;
use crate::alert::trigger::{PublicationTracker, UpdatePolicy, UpdateReason};
use crate::config::{ControlConfig, Mode};
use crate::ingest::{ForecastSource, kma};
use crate::logging::{self, Component};
use crate::model::{FetchError, ObsLogError, PublicationKey, RainfallRate, RiskLevel, SensorTier};
use crate::obslog::{ObservationLog, ObservationRow};
use crate::sensor::{SensorFlags, SensorLink};
use crate::shutdown::ShutdownFlag;

/// How often the sensor state is repeated in the log while a flag is raised.
pub const SENSOR_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Ticks between checks of the serial input backlog.
pub const BACKLOG_CHECK_TICKS: u64 = 30;

/// Backlog size that suggests the link is not being drained fast enough.
pub const BACKLOG_WARN_BYTES: usize = 100;

// ---------------------------------------------------------------------------
// Step results
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Log(#[from] ObsLogError),
}

/// Result of the nowcast step of one tick.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The key was already logged.
    Skipped,
    /// A new observation was fetched and appended.
    Logged(ObservationRow),
    /// Fetch or append failed; the key will be retried next tick.
    Failed(StepError),
}

/// One transmitted risk update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskUpdate {
    pub reason: UpdateReason,
    pub tier: SensorTier,
    pub rainfall: RainfallRate,
    pub risk: RiskLevel,
}

#[derive(Debug)]
pub struct TickReport {
    pub key: PublicationKey,
    pub fetch: FetchOutcome,
    pub sensor_changed: bool,
    pub update: Option<RiskUpdate>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<F: ForecastSource, L: SensorLink> {
    source: F,
    link: L,
    log: ObservationLog,
    mode: Mode,
    tracker: PublicationTracker,
    policy: UpdatePolicy,
    sensors: SensorFlags,
    last_status_log: Option<Instant>,
    ticks: u64,
}

impl<F: ForecastSource, L: SensorLink> Controller<F, L> {
    /// Builds a controller. Dedup resumes from the last key already in `log`.
    pub fn new(source: F, link: L, log: ObservationLog, control: &ControlConfig) -> Self {
        let tracker = PublicationTracker::resume_from(log.last_key());
        Self {
            source,
            link,
            log,
            mode: control.mode,
            tracker,
            policy: UpdatePolicy::new(control.heartbeat()),
            sensors: SensorFlags::default(),
            last_status_log: None,
            ticks: 0,
        }
    }

    pub fn sensors(&self) -> SensorFlags {
        self.sensors
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn log(&self) -> &ObservationLog {
        &self.log
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    /// Runs one cycle for publication `key` at time `now`.
    pub fn tick(&mut self, key: PublicationKey, now: Instant) -> TickReport {
        self.ticks += 1;
        let fetch = self.fetch_step(&key);

        if self.mode == Mode::Collector {
            return TickReport {
                key,
                fetch,
                sensor_changed: false,
                update: None,
            };
        }

        let sensor_changed = self.link.poll(&mut self.sensors);
        self.log_sensor_status(now);
        self.check_backlog();

        let forecast_refreshed = matches!(fetch, FetchOutcome::Logged(_));
        let update = self
            .policy
            .due_at(forecast_refreshed, sensor_changed, now)
            .map(|reason| self.send_update(reason, now));

        TickReport {
            key,
            fetch,
            sensor_changed,
            update,
        }
    }

    fn fetch_step(&mut self, key: &PublicationKey) -> FetchOutcome {
        if !self.tracker.is_new(key) {
            return FetchOutcome::Skipped;
        }
        let result = self
            .source
            .fetch(key)
            .map_err(StepError::from)
            .and_then(|obs| self.log.append(&obs).map_err(StepError::from));
        match result {
            Ok(row) => {
                self.tracker.mark_logged(key.clone());
                FetchOutcome::Logged(row)
            }
            Err(e) => FetchOutcome::Failed(e),
        }
    }

    fn send_update(&mut self, reason: UpdateReason, now: Instant) -> RiskUpdate {
        // Rainfall always comes from the log, never from the fetch in hand.
        let rainfall = self.log.latest_rainfall();
        let tier = self.sensors.tier();
        let risk = compute_risk(tier, rainfall);
        self.link.send(tier, rainfall, risk);
        self.policy.record_update(now);
        RiskUpdate {
            reason,
            tier,
            rainfall,
            risk,
        }
    }

    fn log_sensor_status(&mut self, now: Instant) {
        let first = self.last_status_log.is_none();
        let due = self
            .last_status_log
            .is_none_or(|last| now.saturating_duration_since(last) >= SENSOR_STATUS_INTERVAL);
        if due && (first || self.sensors.any()) {
            let label = if first { "initial sensor state" } else { "sensor state" };
            logging::info(Component::Serial, None, &format!("{} {}", label, self.sensors));
            self.last_status_log = Some(now);
        }
    }

    fn check_backlog(&mut self) {
        if self.ticks % BACKLOG_CHECK_TICKS != 0 {
            return;
        }
        let backlog = self.link.backlog();
        if backlog > BACKLOG_WARN_BYTES {
            logging::warn(
                Component::Serial,
                None,
                &format!("{} bytes backed up in the serial input buffer", backlog),
            );
        }
    }

    /// Loops until `shutdown` is requested, one tick per `period`.
    pub fn run(&mut self, shutdown: &ShutdownFlag, period: Duration) {
        while !shutdown.is_requested() {
            let report = self.tick(kma::latest_publication(), Instant::now());
            report_tick(&report);
            thread::sleep(period);
        }
    }
}

/// Logs a tick's outcome. Every step failure passes through here.
pub fn report_tick(report: &TickReport) {
    let key = report.key.to_string();
    match &report.fetch {
        FetchOutcome::Skipped => {}
        FetchOutcome::Logged(row) => logging::info(
            Component::ObsLog,
            Some(&key),
            &format!(
                "logged T1H={} RN1={} REH={} WSD={}",
                row.temperature_c, row.rainfall_mm, row.humidity_pct, row.wind_speed_ms
            ),
        ),
        FetchOutcome::Failed(StepError::Fetch(e)) => logging::log_fetch_failure(&key, e),
        FetchOutcome::Failed(StepError::Log(e)) => {
            logging::error(Component::ObsLog, Some(&key), &e.to_string())
        }
    }

    if let Some(update) = &report.update {
        logging::log_update(update.reason, update.tier, update.rainfall, update.risk);
    }
}
