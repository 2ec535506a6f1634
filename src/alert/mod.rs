//! Risk fusion and update triggering.
//!
//! Submodules:
//! - `risk`: pure (tier, rainfall) → risk level decision table.
//! - `trigger`: when to recompute and retransmit the risk level.

pub mod risk;
pub mod trigger;
