//! Nowcast flood alert service.
//!
//! Polls the KMA ultra-short-term nowcast for one grid cell, logs each
//! observation to CSV, reads water-level float switches from a
//! microcontroller over serial, fuses both into a risk level, and sends that
//! level back to the microcontroller to drive its lights and buzzer.

pub mod alert;
pub mod config;
pub mod control;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod obslog;
pub mod sensor;
pub mod shutdown;
