//! Serial link to the water-level microcontroller.
//!
//! Inbound, the microcontroller prints its three float switches as
//! `SENSOR:<g>:<y>:<r>` lines, each flag `0` or `1`. Anything else on the
//! line (debug chatter, echoes, partial garbage) is ignored. Outbound, we send
//! the fused state as `DATA:<tier>:<rainfall>:<risk>`, fire-and-forget.
//!
//! Reads never block: `poll` drains only the bytes already buffered by the
//! driver and keeps an unterminated tail for the next poll.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use thiserror::Error;

use crate::config::SerialConfig;
use crate::logging::{self, Component};
use crate::model::{RainfallRate, RiskLevel, SensorTier};

/// Unterminated input beyond this is discarded.
const MAX_PENDING_BYTES: usize = 1024;

// ---------------------------------------------------------------------------
// Sensor state
// ---------------------------------------------------------------------------

/// The three float-switch flags as last reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorFlags {
    pub green: bool,
    pub yellow: bool,
    pub red: bool,
}

impl SensorFlags {
    pub fn new(green: bool, yellow: bool, red: bool) -> Self {
        Self { green, yellow, red }
    }

    /// Highest raised flag wins.
    pub fn tier(&self) -> SensorTier {
        if self.red {
            SensorTier::Red
        } else if self.yellow {
            SensorTier::Yellow
        } else if self.green {
            SensorTier::Green
        } else {
            SensorTier::None
        }
    }

    pub fn any(&self) -> bool {
        self.green || self.yellow || self.red
    }
}

impl std::fmt::Display for SensorFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "G:{} Y:{} R:{}", self.green, self.yellow, self.red)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Parses one `SENSOR:<g>:<y>:<r>` line. Returns `None` for anything else.
pub fn parse_sensor_line(line: &str) -> Option<SensorFlags> {
    let mut parts = line.trim().split(':');
    if parts.next()? != "SENSOR" {
        return None;
    }
    let green = parse_flag(parts.next()?)?;
    let yellow = parse_flag(parts.next()?)?;
    let red = parse_flag(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(SensorFlags { green, yellow, red })
}

/// Encodes the outbound risk frame, newline included.
pub fn encode_risk_frame(tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel) -> String {
    format!("DATA:{}:{}:{}\n", tier, rainfall, risk)
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Byte stream to the microcontroller that can report how much input is
/// buffered.
pub trait Transport: Read + Write {
    fn bytes_waiting(&mut self) -> io::Result<usize>;
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_waiting(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

/// What the control loop needs from the microcontroller link.
pub trait SensorLink {
    /// Drains buffered input and applies every valid `SENSOR` line to
    /// `state`. Returns `true` if any flag changed. Never fails: read errors
    /// are logged and count as "no data".
    fn poll(&mut self, state: &mut SensorFlags) -> bool;

    /// Sends the fused risk state. Failures are logged and swallowed.
    fn send(&mut self, tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel);

    /// Bytes waiting in the inbound buffer.
    fn backlog(&mut self) -> usize {
        0
    }
}

impl<L: SensorLink + ?Sized> SensorLink for Box<L> {
    fn poll(&mut self, state: &mut SensorFlags) -> bool {
        (**self).poll(state)
    }

    fn send(&mut self, tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel) {
        (**self).send(tier, rainfall, risk)
    }

    fn backlog(&mut self) -> usize {
        (**self).backlog()
    }
}

// ---------------------------------------------------------------------------
// Serial link
// ---------------------------------------------------------------------------

pub struct SerialLink<T: Transport> {
    transport: T,
    port_name: String,
    pending: Vec<u8>,
}

impl<T: Transport> SerialLink<T> {
    pub fn new(transport: T, port_name: impl Into<String>) -> Self {
        Self {
            transport,
            port_name: port_name.into(),
            pending: Vec::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Reads everything currently buffered and splits off complete lines.
    fn drain_lines(&mut self) -> io::Result<Vec<String>> {
        let mut buf = [0u8; 256];
        loop {
            let waiting = self.transport.bytes_waiting()?;
            if waiting == 0 {
                break;
            }
            let cap = waiting.min(buf.len());
            let n = self.transport.read(&mut buf[..cap])?;
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&buf[..n]);
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw).trim().to_string());
        }
        if self.pending.len() > MAX_PENDING_BYTES {
            logging::warn(
                Component::Serial,
                Some(&self.port_name),
                &format!("dropping {} bytes without a line break", self.pending.len()),
            );
            self.pending.clear();
        }
        Ok(lines)
    }
}

impl<T: Transport> SensorLink for SerialLink<T> {
    fn poll(&mut self, state: &mut SensorFlags) -> bool {
        let lines = match self.drain_lines() {
            Ok(lines) => lines,
            Err(e) => {
                logging::error(Component::Serial, Some(&self.port_name), &format!("read failed: {}", e));
                return false;
            }
        };

        let mut changed = false;
        for flags in lines.iter().filter_map(|line| parse_sensor_line(line)) {
            if flags != *state {
                logging::info(
                    Component::Serial,
                    Some(&self.port_name),
                    &format!("sensor {} (was {})", flags, state),
                );
                *state = flags;
                changed = true;
            }
        }
        changed
    }

    fn send(&mut self, tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel) {
        let frame = encode_risk_frame(tier, rainfall, risk);
        let result = self
            .transport
            .write_all(frame.as_bytes())
            .and_then(|_| self.transport.flush());
        if let Err(e) = result {
            logging::error(Component::Serial, Some(&self.port_name), &format!("write failed: {}", e));
        }
    }

    fn backlog(&mut self) -> usize {
        self.transport.bytes_waiting().unwrap_or(0)
    }
}

/// Stand-in when no microcontroller could be opened.
#[derive(Debug, Default)]
pub struct Disconnected;

impl SensorLink for Disconnected {
    fn poll(&mut self, _state: &mut SensorFlags) -> bool {
        false
    }

    fn send(&mut self, tier: SensorTier, rainfall: RainfallRate, risk: RiskLevel) {
        logging::debug(
            Component::Serial,
            None,
            &format!("no microcontroller; dropped {} / {} / {}", tier, rainfall, risk),
        );
    }
}

// ---------------------------------------------------------------------------
// Port discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SerialLinkError {
    #[error("port enumeration failed: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("no candidate serial ports found")]
    NoCandidates,
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("all {0} candidate ports failed to open")]
    AllFailed(usize),
}

/// A port as seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub device: String,
    pub description: String,
}

impl From<&serialport::SerialPortInfo> for PortCandidate {
    fn from(info: &serialport::SerialPortInfo) -> Self {
        let description = match &info.port_type {
            SerialPortType::UsbPort(usb) => [usb.manufacturer.as_deref(), usb.product.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" "),
            SerialPortType::BluetoothPort => "bluetooth".to_string(),
            SerialPortType::PciPort => "pci".to_string(),
            SerialPortType::Unknown => String::new(),
        };
        Self {
            device: info.port_name.clone(),
            description,
        }
    }
}

const USB_SERIAL_MARKERS: [&str; 4] = ["usbmodem", "usbserial", "ttyusb", "ttyacm"];

/// Rank of a port as a microcontroller candidate; `None` excludes it.
/// Bluetooth ports are always excluded.
pub fn candidate_priority(port: &PortCandidate) -> Option<u8> {
    let device = port.device.to_lowercase();
    let description = port.description.to_lowercase();
    if device.contains("bluetooth") || description.contains("bluetooth") {
        return None;
    }

    let usb = USB_SERIAL_MARKERS.iter().any(|m| device.contains(m));
    let com = port.device.to_uppercase().starts_with("COM");
    if !usb && !com {
        return None;
    }
    Some(if description.contains("arduino") { 2 } else { 1 })
}

/// Candidates in the order they should be tried, best first.
pub fn rank_candidates(ports: &[PortCandidate]) -> Vec<PortCandidate> {
    let mut ranked: Vec<(u8, PortCandidate)> = ports
        .iter()
        .filter_map(|p| candidate_priority(p).map(|prio| (prio, p.clone())))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().map(|(_, p)| p).collect()
}

/// Opens one port, waits for the board to settle, and clears stale bytes.
pub fn open_port(
    path: &str,
    config: &SerialConfig,
) -> Result<SerialLink<Box<dyn SerialPort>>, SerialLinkError> {
    let port = serialport::new(path, config.baud_rate)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()
        .map_err(|source| SerialLinkError::Open {
            port: path.to_string(),
            source,
        })?;

    // Opening the port resets most Arduino boards.
    thread::sleep(Duration::from_millis(config.settle_ms));
    if let Err(e) = port.clear(ClearBuffer::All) {
        logging::warn(Component::Serial, Some(path), &format!("buffer clear failed: {}", e));
    }
    Ok(SerialLink::new(port, path))
}

/// Opens the configured port, or discovers one.
pub fn connect(config: &SerialConfig) -> Result<SerialLink<Box<dyn SerialPort>>, SerialLinkError> {
    if let Some(path) = &config.port {
        return open_port(path, config);
    }

    let ports: Vec<PortCandidate> = serialport::available_ports()
        .map_err(SerialLinkError::Enumerate)?
        .iter()
        .map(PortCandidate::from)
        .collect();
    for port in &ports {
        logging::debug(
            Component::Serial,
            Some(&port.device),
            &format!("found port ({})", port.description),
        );
    }

    let candidates = rank_candidates(&ports);
    if candidates.is_empty() {
        return Err(SerialLinkError::NoCandidates);
    }

    for candidate in &candidates {
        match open_port(&candidate.device, config) {
            Ok(link) => return Ok(link),
            Err(e) => logging::warn(Component::Serial, Some(&candidate.device), &e.to_string()),
        }
    }
    Err(SerialLinkError::AllFailed(candidates.len()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
