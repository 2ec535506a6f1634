//! Nowcast retrieval.
//!
//! Submodules:
//! - `kma`: KMA ultra-short-term nowcast client, publication windows, retry.

pub mod kma;

use crate::model::{FetchError, Observation, PublicationKey};

/// Anything that can produce the observation for a publication key.
///
/// The control loop depends on this rather than on `KmaClient` so it can be
/// driven by canned observations in tests.
pub trait ForecastSource {
    fn fetch(&mut self, key: &PublicationKey) -> Result<Observation, FetchError>;
}
