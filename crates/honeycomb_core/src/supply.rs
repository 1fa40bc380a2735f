//! Driver cell tracker: live driver → cell membership and per-cell supply
//! counters, mutated on every accepted location ping.
//!
//! Every mutation is one atomic store batch, so a driver is never counted in
//! two cells (or zero cells) between the halves of a move. The membership
//! set, the supply counters, and the driver markers share one TTL and are
//! re-armed together; a silent driver simply ages out of the view.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use honeycomb_store::{SharedStore, StoreBatch, StoreResult};

use crate::category::VehicleCategory;
use crate::grid::{self, CellId};
use crate::keys;
use crate::settings::SettingsCache;

/// Freshness bound for membership, counters, and driver markers. A driver
/// that stops pinging disappears from the dispatch view after this long.
pub const SUPPLY_TTL: Duration = Duration::from_secs(10 * 60);

pub struct DriverCellTracker {
    store: Arc<dyn SharedStore>,
    settings: Arc<SettingsCache>,
}

impl DriverCellTracker {
    pub fn new(store: Arc<dyn SharedStore>, settings: Arc<SettingsCache>) -> Self {
        Self { store, settings }
    }

    /// Record a driver's position from an accepted location ping.
    ///
    /// No-op when the zone has honeycomb disabled. A ping inside the
    /// driver's current cell only re-arms TTLs; a cell change moves the
    /// driver's membership and counters in one atomic batch. A failed batch
    /// is dropped and logged; the view goes stale until the next ping or
    /// TTL expiry, never inconsistent.
    pub fn update_driver_cell(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        zone_id: &str,
        category: VehicleCategory,
    ) {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return;
        };
        if !settings.enabled {
            return;
        }
        let new_cell = grid::encode(lat, lng, settings.grid_resolution());

        let (previous_cell, previous_category) = match self.tracked_state(zone_id, driver_id) {
            Ok(state) => state,
            Err(err) => {
                warn!(driver = driver_id, zone = zone_id, error = %err, "driver marker read failed; dropping location update");
                return;
            }
        };

        let batch = if previous_cell == Some(new_cell) && previous_category == Some(category) {
            Self::refresh_batch(zone_id, driver_id, new_cell, category)
        } else {
            Self::move_batch(
                zone_id,
                driver_id,
                previous_cell,
                previous_category,
                new_cell,
                category,
            )
        };

        if let Err(err) = self.store.apply(batch) {
            warn!(driver = driver_id, zone = zone_id, error = %err, "cell move batch failed; dispatch view stale until next ping");
        }
    }

    /// Remove a driver on explicit offline or deactivation, instead of
    /// waiting for TTL expiry, so dashboards reflect immediate state.
    pub fn remove_driver_from_cells(&self, driver_id: &str, zone_id: &str) {
        let (previous_cell, previous_category) = match self.tracked_state(zone_id, driver_id) {
            Ok(state) => state,
            Err(err) => {
                warn!(driver = driver_id, zone = zone_id, error = %err, "driver marker read failed; skipping removal");
                return;
            }
        };
        let Some(previous_cell) = previous_cell else {
            debug!(driver = driver_id, zone = zone_id, "removal for untracked driver ignored");
            return;
        };

        let mut batch = StoreBatch::new()
            .set_remove(keys::cell_drivers(zone_id, previous_cell), driver_id)
            .incr_by(keys::cell_supply(zone_id, previous_cell), -1)
            .delete(keys::driver_cell(zone_id, driver_id))
            .delete(keys::driver_category(zone_id, driver_id));
        if let Some(category) = previous_category {
            batch = batch.incr_by(
                keys::cell_supply_category(zone_id, previous_cell, category),
                -1,
            );
        }

        if let Err(err) = self.store.apply(batch) {
            warn!(driver = driver_id, zone = zone_id, error = %err, "offline removal batch failed; driver ages out on TTL");
        }
    }

    /// Last tracked (cell, category) of a driver, from the marker keys.
    /// Both markers share the membership TTL, so a missing cell marker means
    /// the whole old-cell state has expired with it.
    fn tracked_state(
        &self,
        zone_id: &str,
        driver_id: &str,
    ) -> StoreResult<(Option<CellId>, Option<VehicleCategory>)> {
        let markers = self.store.get_many(&[
            keys::driver_cell(zone_id, driver_id),
            keys::driver_category(zone_id, driver_id),
        ])?;
        let cell = markers
            .first()
            .and_then(|raw| raw.as_deref())
            .and_then(CellId::parse);
        let category = markers
            .get(1)
            .and_then(|raw| raw.as_deref())
            .and_then(VehicleCategory::parse);
        Ok((cell, category))
    }

    /// Same cell, same category: re-arm every TTL, no counter churn.
    fn refresh_batch(
        zone_id: &str,
        driver_id: &str,
        cell: CellId,
        category: VehicleCategory,
    ) -> StoreBatch {
        StoreBatch::new()
            .expire(keys::cell_drivers(zone_id, cell), SUPPLY_TTL)
            .expire(keys::cell_supply(zone_id, cell), SUPPLY_TTL)
            .expire(keys::cell_supply_category(zone_id, cell, category), SUPPLY_TTL)
            .expire(keys::driver_cell(zone_id, driver_id), SUPPLY_TTL)
            .expire(keys::driver_category(zone_id, driver_id), SUPPLY_TTL)
    }

    /// Move the driver between cells (or between categories within a cell):
    /// drain the old side, fill the new side, rewrite markers, re-arm TTLs.
    /// The old side is only drained while its markers are still live: if
    /// they expired, its membership and counters expired with them.
    fn move_batch(
        zone_id: &str,
        driver_id: &str,
        previous_cell: Option<CellId>,
        previous_category: Option<VehicleCategory>,
        new_cell: CellId,
        category: VehicleCategory,
    ) -> StoreBatch {
        let mut batch = StoreBatch::new();
        if let Some(old_cell) = previous_cell {
            batch = batch
                .set_remove(keys::cell_drivers(zone_id, old_cell), driver_id)
                .incr_by(keys::cell_supply(zone_id, old_cell), -1);
            if let Some(old_category) = previous_category {
                batch = batch.incr_by(
                    keys::cell_supply_category(zone_id, old_cell, old_category),
                    -1,
                );
            }
        }
        batch
            .set_add(keys::cell_drivers(zone_id, new_cell), driver_id)
            .incr_by(keys::cell_supply(zone_id, new_cell), 1)
            .incr_by(keys::cell_supply_category(zone_id, new_cell, category), 1)
            .put(
                keys::driver_cell(zone_id, driver_id),
                new_cell.to_string(),
                Some(SUPPLY_TTL),
            )
            .put(
                keys::driver_category(zone_id, driver_id),
                category.as_str(),
                Some(SUPPLY_TTL),
            )
            .expire(keys::cell_drivers(zone_id, new_cell), SUPPLY_TTL)
            .expire(keys::cell_supply(zone_id, new_cell), SUPPLY_TTL)
            .expire(keys::cell_supply_category(zone_id, new_cell, category), SUPPLY_TTL)
    }

    /// Driver ids currently in a cell.
    pub fn members(&self, zone_id: &str, cell: CellId) -> StoreResult<Vec<String>> {
        self.store.set_members(&keys::cell_drivers(zone_id, cell))
    }

    /// Total supply in a cell. Negative counters (possible only around TTL
    /// races) read as zero.
    pub fn cell_supply(&self, zone_id: &str, cell: CellId) -> StoreResult<u64> {
        let count = self.store.counter(&keys::cell_supply(zone_id, cell))?;
        Ok(count.max(0) as u64)
    }

    /// Per-category supply breakdown for a cell.
    pub fn cell_supply_by_category(
        &self,
        zone_id: &str,
        cell: CellId,
    ) -> StoreResult<Vec<(VehicleCategory, u64)>> {
        VehicleCategory::ALL
            .iter()
            .map(|&category| {
                let count = self
                    .store
                    .counter(&keys::cell_supply_category(zone_id, cell, category))?;
                Ok((category, count.max(0) as u64))
            })
            .collect()
    }

    /// Last tracked cell of a driver, if still live.
    pub fn driver_cell(&self, zone_id: &str, driver_id: &str) -> StoreResult<Option<CellId>> {
        Ok(self
            .store
            .get(&keys::driver_cell(zone_id, driver_id))?
            .as_deref()
            .and_then(CellId::parse))
    }

    /// Tracked categories for a batch of drivers, in order. Used by the
    /// advisory category filter in candidate search.
    pub fn driver_categories(
        &self,
        zone_id: &str,
        driver_ids: &[String],
    ) -> StoreResult<Vec<Option<VehicleCategory>>> {
        let marker_keys: Vec<String> = driver_ids
            .iter()
            .map(|driver_id| keys::driver_category(zone_id, driver_id))
            .collect();
        Ok(self
            .store
            .get_many(&marker_keys)?
            .into_iter()
            .map(|raw| raw.as_deref().and_then(VehicleCategory::parse))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsRepository, ZoneSettings};
    use honeycomb_store::{ManualClock, MemoryStore};

    const ZONE: &str = "sofia";
    const LAT_A: f64 = 37.7749;
    const LNG_A: f64 = -122.4194;
    // Far enough from (LAT_A, LNG_A) to land in a different res-8 cell.
    const LAT_B: f64 = 37.8049;
    const LNG_B: f64 = -122.2711;

    fn tracker_fixture() -> (DriverCellTracker, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let repository = Arc::new(MemorySettingsRepository::new());
        repository
            .upsert(None, &ZoneSettings::default())
            .expect("global settings row");
        let settings = Arc::new(SettingsCache::new(repository, store.clone(), clock.clone()));
        (
            DriverCellTracker::new(store.clone(), settings),
            store,
            clock,
        )
    }

    fn cell_at(lat: f64, lng: f64) -> CellId {
        grid::encode(lat, lng, ZoneSettings::default().grid_resolution())
    }

    #[test]
    fn first_ping_registers_membership_and_counters() {
        let (tracker, _store, _clock) = tracker_fixture();
        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);

        let cell = cell_at(LAT_A, LNG_A);
        assert_eq!(tracker.members(ZONE, cell).expect("members"), vec!["d-1"]);
        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 1);
        assert_eq!(
            tracker.cell_supply_by_category(ZONE, cell).expect("breakdown"),
            vec![
                (VehicleCategory::Budget, 0),
                (VehicleCategory::Pro, 1),
                (VehicleCategory::Vip, 0),
            ]
        );
        assert_eq!(tracker.driver_cell(ZONE, "d-1").expect("marker"), Some(cell));
    }

    #[test]
    fn moving_between_cells_conserves_the_driver_count() {
        let (tracker, _store, _clock) = tracker_fixture();
        let cell_a = cell_at(LAT_A, LNG_A);
        let cell_b = cell_at(LAT_B, LNG_B);
        assert_ne!(cell_a, cell_b, "test coordinates must map to distinct cells");

        for other in ["d-2", "d-3"] {
            tracker.update_driver_cell(other, LAT_A, LNG_A, ZONE, VehicleCategory::Budget);
        }
        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);
        assert_eq!(tracker.cell_supply(ZONE, cell_a).expect("supply"), 3);

        tracker.update_driver_cell("d-1", LAT_B, LNG_B, ZONE, VehicleCategory::Pro);
        assert_eq!(tracker.cell_supply(ZONE, cell_a).expect("supply"), 2);
        assert_eq!(tracker.cell_supply(ZONE, cell_b).expect("supply"), 1);
        assert!(!tracker
            .members(ZONE, cell_a)
            .expect("members")
            .contains(&"d-1".to_owned()));
        assert!(tracker
            .members(ZONE, cell_b)
            .expect("members")
            .contains(&"d-1".to_owned()));
    }

    #[test]
    fn repeated_pings_in_one_cell_do_not_churn_counters() {
        let (tracker, _store, _clock) = tracker_fixture();
        let cell = cell_at(LAT_A, LNG_A);

        for _ in 0..5 {
            tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Vip);
        }
        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 1);
        assert_eq!(tracker.members(ZONE, cell).expect("members").len(), 1);
    }

    #[test]
    fn same_cell_pings_keep_the_driver_alive_past_the_ttl() {
        let (tracker, _store, clock) = tracker_fixture();
        let cell = cell_at(LAT_A, LNG_A);

        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);
        clock.advance(SUPPLY_TTL - Duration::from_secs(30));
        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);
        clock.advance(SUPPLY_TTL - Duration::from_secs(30));

        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 1);

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            tracker.cell_supply(ZONE, cell).expect("supply"),
            0,
            "silent driver ages out"
        );
        assert!(tracker.members(ZONE, cell).expect("members").is_empty());
    }

    #[test]
    fn category_change_within_a_cell_moves_the_subtotal() {
        let (tracker, _store, _clock) = tracker_fixture();
        let cell = cell_at(LAT_A, LNG_A);

        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Budget);
        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Vip);

        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 1);
        assert_eq!(
            tracker.cell_supply_by_category(ZONE, cell).expect("breakdown"),
            vec![
                (VehicleCategory::Budget, 0),
                (VehicleCategory::Pro, 0),
                (VehicleCategory::Vip, 1),
            ]
        );
    }

    #[test]
    fn explicit_removal_clears_membership_and_counters() {
        let (tracker, store, _clock) = tracker_fixture();
        let cell = cell_at(LAT_A, LNG_A);

        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);
        tracker.remove_driver_from_cells("d-1", ZONE);

        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 0);
        assert!(tracker.members(ZONE, cell).expect("members").is_empty());
        assert_eq!(tracker.driver_cell(ZONE, "d-1").expect("marker"), None);
        assert_eq!(
            store
                .get(&keys::driver_category(ZONE, "d-1"))
                .expect("marker"),
            None
        );

        // Removing an untracked driver is a quiet no-op.
        tracker.remove_driver_from_cells("d-1", ZONE);
        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 0);
    }

    #[test]
    fn disabled_zone_ignores_location_updates() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let repository = Arc::new(MemorySettingsRepository::new());
        repository
            .upsert(
                None,
                &ZoneSettings {
                    enabled: false,
                    ..ZoneSettings::default()
                },
            )
            .expect("settings row");
        let settings = Arc::new(SettingsCache::new(repository, store.clone(), clock));
        let tracker = DriverCellTracker::new(store, settings);

        tracker.update_driver_cell("d-1", LAT_A, LNG_A, ZONE, VehicleCategory::Pro);
        let cell = cell_at(LAT_A, LNG_A);
        assert_eq!(tracker.cell_supply(ZONE, cell).expect("supply"), 0);
        assert_eq!(tracker.driver_cell(ZONE, "d-1").expect("marker"), None);
    }
}
