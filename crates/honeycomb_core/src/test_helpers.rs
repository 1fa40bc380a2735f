//! Test helpers for common engine setup and utilities.
//!
//! This module provides shared fixtures so tests do not repeat the
//! store/clock/settings wiring, plus a driver scatterer for populating a
//! zone with plausible supply.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use honeycomb_store::{ManualClock, MemoryStore};

use crate::category::VehicleCategory;
use crate::engine::Honeycomb;
use crate::settings::{MemorySettingsRepository, ZoneSettings};

/// Standard test zone used across test files for consistency.
pub const TEST_ZONE: &str = "test-zone";

/// A point in downtown San Francisco, inside [`TEST_BBOX`].
pub const TEST_LAT: f64 = 37.7749;
pub const TEST_LNG: f64 = -122.4194;

/// Bounding box for scattered test drivers: San Francisco (approx).
pub const TEST_BBOX: (f64, f64, f64, f64) = (37.70, 37.82, -122.52, -122.36);

/// Everything a test needs to drive the engine deterministically.
pub struct EngineFixture {
    pub engine: Honeycomb,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub repository: Arc<MemorySettingsRepository>,
}

/// Engine over a fresh in-memory store and manual clock, with the given
/// settings installed as the global fallback row.
pub fn engine_with_settings(settings: &ZoneSettings) -> EngineFixture {
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let repository = Arc::new(MemorySettingsRepository::new());
    repository
        .upsert(None, settings)
        .expect("global settings row");
    let engine = Honeycomb::new(store.clone(), repository.clone(), clock.clone());
    EngineFixture {
        engine,
        store,
        clock,
        repository,
    }
}

/// Engine with default zone settings.
pub fn test_engine() -> EngineFixture {
    engine_with_settings(&ZoneSettings::default())
}

/// Scatter `count` drivers uniformly over [`TEST_BBOX`], cycling through
/// the vehicle categories. Seeded for reproducibility.
pub fn scatter_drivers(engine: &Honeycomb, count: usize, seed: u64) {
    let (lat_min, lat_max, lng_min, lng_max) = TEST_BBOX;
    let mut rng = StdRng::seed_from_u64(seed);
    for index in 0..count {
        let lat = rng.gen_range(lat_min..lat_max);
        let lng = rng.gen_range(lng_min..lng_max);
        let category = VehicleCategory::ALL[index % VehicleCategory::ALL.len()];
        engine.update_driver_cell(&format!("driver-{index}"), lat, lng, TEST_ZONE, category);
    }
}
