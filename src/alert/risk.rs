//! Risk fusion: water-level tier plus rainfall intensity into one risk level.
//!
//! The float sensors are the ground truth. Each tier maps to a base risk,
//! and rainfall can only push that risk upward. The parking-garage flood
//! barrier holds back anything under 30 mm/h, so lighter rain never changes
//! the result.

use crate::model::{RainfallRate, RiskLevel, SensorTier};

/// 100 mm/h and above: extreme downpour, two levels up.
pub const RAIN_EXTREME_MM_H: f64 = 100.0;

/// 50-100 mm/h: very heavy rain, one level up.
pub const RAIN_HEAVY_MM_H: f64 = 50.0;

/// 30-50 mm/h: heavy rain, one level up. Below this the barrier holds.
pub const RAIN_MODERATE_MM_H: f64 = 30.0;

/// Risk implied by the sensors alone.
pub fn base_risk(tier: SensorTier) -> RiskLevel {
    match tier {
        SensorTier::None => RiskLevel::Safe,
        SensorTier::Green => RiskLevel::Caution,
        SensorTier::Yellow => RiskLevel::Warning,
        SensorTier::Red => RiskLevel::Danger,
    }
}

/// How many levels the given rainfall raises the base risk.
#[allow(clippy::if_same_then_else)]
pub fn rainfall_shift(rainfall: RainfallRate) -> usize {
    let mm = rainfall.mm_per_hour();
    if mm >= RAIN_EXTREME_MM_H {
        2
    } else if mm >= RAIN_HEAVY_MM_H {
        1
    } else if mm >= RAIN_MODERATE_MM_H {
        1
    } else {
        0
    }
}

/// Fuses the sensor tier and the latest rainfall into a risk level.
///
/// Total and pure: the result depends only on the two arguments. Rainfall
/// escalates from the sensor floor and the result clamps at `Danger`.
pub fn compute_risk(tier: SensorTier, rainfall: RainfallRate) -> RiskLevel {
    let base = base_risk(tier);
    RiskLevel::from_ordinal_clamped(base.ordinal() + rainfall_shift(rainfall))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rain(mm: f64) -> RainfallRate {
        RainfallRate::new(mm)
    }

    // --- Sensor floor -------------------------------------------------------

    #[test]
    fn test_dry_weather_uses_sensor_tier_directly() {
        assert_eq!(compute_risk(SensorTier::None, rain(0.0)), RiskLevel::Safe);
        assert_eq!(compute_risk(SensorTier::Green, rain(0.0)), RiskLevel::Caution);
        assert_eq!(compute_risk(SensorTier::Yellow, rain(0.0)), RiskLevel::Warning);
        assert_eq!(compute_risk(SensorTier::Red, rain(0.0)), RiskLevel::Danger);
    }

    #[test]
    fn test_rain_below_barrier_threshold_has_no_effect() {
        assert_eq!(compute_risk(SensorTier::Green, rain(20.0)), RiskLevel::Caution);
        assert_eq!(compute_risk(SensorTier::Yellow, rain(29.9)), RiskLevel::Warning);
    }

    // --- Escalation ---------------------------------------------------------

    #[test]
    fn test_moderate_rain_raises_one_level() {
        assert_eq!(compute_risk(SensorTier::Green, rain(35.0)), RiskLevel::Warning);
        assert_eq!(compute_risk(SensorTier::None, rain(30.0)), RiskLevel::Caution);
    }

    #[test]
    fn test_heavy_rain_raises_one_level() {
        assert_eq!(compute_risk(SensorTier::Yellow, rain(80.0)), RiskLevel::Danger);
        assert_eq!(compute_risk(SensorTier::Green, rain(50.0)), RiskLevel::Warning);
    }

    #[test]
    fn test_extreme_rain_without_water_stops_at_warning() {
        // SAFE is ordinal 0; two levels up lands on WARNING, not DANGER.
        assert_eq!(compute_risk(SensorTier::None, rain(150.0)), RiskLevel::Warning);
    }

    #[test]
    fn test_extreme_rain_clamps_at_danger() {
        assert_eq!(compute_risk(SensorTier::Green, rain(100.0)), RiskLevel::Danger);
        assert_eq!(compute_risk(SensorTier::Yellow, rain(120.0)), RiskLevel::Danger);
        assert_eq!(compute_risk(SensorTier::Red, rain(300.0)), RiskLevel::Danger);
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(rainfall_shift(rain(29.999)), 0);
        assert_eq!(rainfall_shift(rain(30.0)), 1);
        assert_eq!(rainfall_shift(rain(49.999)), 1);
        assert_eq!(rainfall_shift(rain(50.0)), 1);
        assert_eq!(rainfall_shift(rain(99.999)), 1);
        assert_eq!(rainfall_shift(rain(100.0)), 2);
    }

    // --- Invariants ---------------------------------------------------------

    fn any_tier() -> impl Strategy<Value = SensorTier> {
        prop::sample::select(SensorTier::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_rainfall_never_lowers_risk(tier in any_tier(), mm in 0.0f64..500.0) {
            let risk = compute_risk(tier, rain(mm));
            prop_assert!(risk >= base_risk(tier));
        }

        #[test]
        fn prop_compute_risk_is_idempotent(tier in any_tier(), mm in 0.0f64..500.0) {
            prop_assert_eq!(compute_risk(tier, rain(mm)), compute_risk(tier, rain(mm)));
        }

        #[test]
        fn prop_more_rain_never_lowers_risk(tier in any_tier(), a in 0.0f64..500.0, b in 0.0f64..500.0) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(compute_risk(tier, rain(low)) <= compute_risk(tier, rain(high)));
        }
    }
}
