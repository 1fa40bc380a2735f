//! End-to-end dispatch flow: location pings, demand, candidate search,
//! surge, and hotspot guidance against one shared in-memory store.

use honeycomb_core::test_helpers::{
    engine_with_settings, scatter_drivers, test_engine, TEST_LAT, TEST_LNG, TEST_ZONE,
};
use honeycomb_core::{CandidateOutcome, VehicleCategory, ZoneSettings};

#[test]
fn pickup_search_finds_scattered_drivers_without_duplicates() {
    let fixture = engine_with_settings(&ZoneSettings {
        search_depth_k: 2,
        ..ZoneSettings::default()
    });
    scatter_drivers(&fixture.engine, 200, 42);

    let outcome = fixture
        .engine
        .candidate_drivers(TEST_LAT, TEST_LNG, TEST_ZONE, None);
    let CandidateOutcome::Candidates(driver_ids) = outcome else {
        panic!("dispatch is enabled; expected candidates");
    };

    assert!(
        !driver_ids.is_empty(),
        "200 drivers over the city must populate a k=2 ring downtown"
    );
    let mut deduped = driver_ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), driver_ids.len());
}

#[test]
fn a_moving_driver_is_counted_in_exactly_one_cell() {
    let fixture = test_engine();
    let positions = [
        (37.7749, -122.4194),
        (37.7749, -122.4194), // same cell ping
        (37.7849, -122.4094),
        (37.8049, -122.2711),
        (37.7600, -122.5000),
    ];
    for (lat, lng) in positions {
        fixture
            .engine
            .update_driver_cell("d-wander", lat, lng, TEST_ZONE, VehicleCategory::Pro);
    }

    // One driver, privacy floor lowered to 1: the zone's supply must sum to 1.
    let entries = heatmap_with_floor_one(&fixture);
    let total: u64 = entries.iter().map(|entry| entry.supply).sum();
    assert_eq!(total, 1, "a moving driver must never be double counted");

    fixture.engine.remove_driver_from_cells("d-wander", TEST_ZONE);
    let entries = heatmap_with_floor_one(&fixture);
    let total: u64 = entries.iter().map(|entry| entry.supply).sum();
    assert_eq!(total, 0, "an offline driver must not be counted anywhere");
}

/// Re-read the zone with the privacy floor lowered to 1 so single-driver
/// cells are visible to the assertion.
fn heatmap_with_floor_one(
    fixture: &honeycomb_core::test_helpers::EngineFixture,
) -> Vec<honeycomb_core::heatmap::HeatmapEntry> {
    fixture
        .repository
        .upsert(
            None,
            &ZoneSettings {
                min_drivers_to_color_cell: 1,
                ..ZoneSettings::default()
            },
        )
        .expect("settings row");
    fixture.engine.invalidate_settings(None);
    fixture.engine.heatmap(TEST_ZONE, 5)
}

#[test]
fn surge_follows_the_worked_example_end_to_end() {
    let fixture = test_engine();
    for driver in ["d-1", "d-2"] {
        fixture
            .engine
            .update_driver_cell(driver, TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Budget);
    }
    for _ in 0..5 {
        fixture
            .engine
            .record_demand(TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Budget);
    }

    // supply=2, demand=5 → imbalance 2.5 → excess 1.0 → 2 steps of 0.1.
    let surge = fixture.engine.surge_multiplier(TEST_LAT, TEST_LNG, TEST_ZONE);
    assert!((surge - 1.2).abs() < 1e-9, "expected 1.2, got {surge}");

    // An empty cell nearby quotes no surge.
    let calm = fixture.engine.surge_multiplier(37.7080, -122.5100, TEST_ZONE);
    assert_eq!(calm, 1.0);
}

#[test]
fn hotspot_guidance_reaches_a_driver_in_a_calm_cell() {
    let fixture = engine_with_settings(&ZoneSettings {
        min_drivers_to_color_cell: 1,
        ..ZoneSettings::default()
    });
    // Hot cell: 2 drivers, 6 requests. Calm cell: 1 idle driver.
    for driver in ["d-1", "d-2"] {
        fixture
            .engine
            .update_driver_cell(driver, TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Pro);
    }
    for _ in 0..6 {
        fixture
            .engine
            .record_demand(TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Pro);
    }
    let (calm_lat, calm_lng) = (37.8049, -122.2711);
    fixture
        .engine
        .update_driver_cell("d-idle", calm_lat, calm_lng, TEST_ZONE, VehicleCategory::Pro);

    let hotspots = fixture.engine.hotspots(TEST_ZONE, 10);
    assert_eq!(hotspots.len(), 1);
    assert!(hotspots[0].incentive > 0.0);

    let stats = fixture
        .engine
        .cell_stats(calm_lat, calm_lng, TEST_ZONE)
        .expect("zone is enabled");
    let direction = stats.suggested_direction.expect("one hotspot exists");
    assert!(direction.distance_km > 1.0);
    assert_eq!(direction.incentive, hotspots[0].incentive);
}

#[test]
fn every_entry_point_degrades_quietly_without_settings() {
    let fixture = test_engine();
    fixture.repository.remove(None).expect("drop global row");
    fixture.engine.invalidate_settings(None);

    fixture
        .engine
        .update_driver_cell("d-1", TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Pro);
    fixture
        .engine
        .record_demand(TEST_LAT, TEST_LNG, TEST_ZONE, VehicleCategory::Pro);

    assert!(fixture
        .engine
        .candidate_drivers(TEST_LAT, TEST_LNG, TEST_ZONE, None)
        .is_disabled());
    assert_eq!(
        fixture.engine.surge_multiplier(TEST_LAT, TEST_LNG, TEST_ZONE),
        1.0
    );
    assert_eq!(fixture.engine.driver_incentive(3.0, TEST_ZONE), 0.0);
    assert!(fixture.engine.heatmap(TEST_ZONE, 5).is_empty());
    assert!(fixture.engine.hotspots(TEST_ZONE, 5).is_empty());
    assert!(fixture.engine.cell_stats(TEST_LAT, TEST_LNG, TEST_ZONE).is_none());
}
