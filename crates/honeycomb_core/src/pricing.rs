//! Imbalance, surge, and incentive formulas.
//!
//! All three are pure functions of (settings, supply, demand); the engine
//! facade reads the counters and calls in here, so the formulas are safe to
//! recompute redundantly and in parallel for many cells.

use crate::settings::ZoneSettings;

/// Width of one surge band in imbalance units. Surge climbs one step per
/// full band of imbalance above the zone's threshold.
pub const SURGE_BAND_WIDTH: f64 = 0.5;

/// Incentive currency units per unit of imbalance above the zone's
/// incentive threshold.
pub const INCENTIVE_RAMP: f64 = 10.0;

/// Demand pressure on a cell: `demand / max(supply, 1)`.
pub fn imbalance(supply: u64, demand: u64) -> f64 {
    demand as f64 / supply.max(1) as f64
}

/// Surge multiplier for a cell at the given imbalance.
///
/// A step function, not a continuous ramp:
/// below the threshold → 1.0; otherwise
/// `steps = floor(excess / 0.5)` and
/// `surge = min(1.0 + steps * surge_step, surge_cap)`.
/// With the default step 0.1 and cap 2.0, supply 2 / demand 5 gives
/// imbalance 2.5 → excess 1.0 → 2 steps → 1.2.
pub fn surge_multiplier(settings: &ZoneSettings, imbalance: f64) -> f64 {
    if !settings.surge_enabled || imbalance < settings.surge_threshold {
        return 1.0;
    }
    let excess = imbalance - settings.surge_threshold;
    let steps = (excess / SURGE_BAND_WIDTH).floor();
    (1.0 + steps * settings.surge_step)
        .min(settings.surge_cap)
        .max(1.0)
}

/// Relocation incentive offered to drivers for a cell at the given
/// imbalance: a linear ramp above the threshold, capped at the zone's
/// configured maximum.
pub fn driver_incentive(settings: &ZoneSettings, imbalance: f64) -> f64 {
    if !settings.incentives_enabled || imbalance < settings.incentive_threshold {
        return 0.0;
    }
    ((imbalance - settings.incentive_threshold) * INCENTIVE_RAMP).min(settings.max_incentive_amount)
}
