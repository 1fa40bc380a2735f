//! Candidate search: the accelerated driver lookup around a pickup point.
//!
//! Pure read path: resolves the origin cell, expands the k-ring, and unions
//! cell membership in one batched store read. Safe to call repeatedly and
//! concurrently; a driver mid-move may transiently appear in two cells' raw
//! sets, which the union de-duplicates.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use honeycomb_store::SharedStore;

use crate::category::VehicleCategory;
use crate::grid;
use crate::keys;
use crate::settings::SettingsCache;
use crate::supply::DriverCellTracker;

/// Result of an accelerated candidate lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Honeycomb dispatch is off for this zone (no settings, master switch
    /// off, or dispatch flag off). The caller must fall back to its
    /// unaccelerated scan.
    Disabled,
    /// Candidate driver ids, de-duplicated. May be empty, including after
    /// a store failure, which is logged here and surfaced as "no
    /// candidates" rather than an error.
    Candidates(Vec<String>),
}

impl CandidateOutcome {
    pub fn is_disabled(&self) -> bool {
        matches!(self, CandidateOutcome::Disabled)
    }

    /// The candidate list, empty when disabled.
    pub fn into_driver_ids(self) -> Vec<String> {
        match self {
            CandidateOutcome::Disabled => Vec::new(),
            CandidateOutcome::Candidates(driver_ids) => driver_ids,
        }
    }
}

pub struct CandidateSearch {
    store: Arc<dyn SharedStore>,
    settings: Arc<SettingsCache>,
    tracker: Arc<DriverCellTracker>,
}

impl CandidateSearch {
    pub fn new(
        store: Arc<dyn SharedStore>,
        settings: Arc<SettingsCache>,
        tracker: Arc<DriverCellTracker>,
    ) -> Self {
        Self {
            store,
            settings,
            tracker,
        }
    }

    /// Candidate drivers near a pickup point.
    ///
    /// Membership is category-agnostic; the `category` filter is advisory.
    /// When passed, drivers whose tracked category differs are dropped, but
    /// drivers with no readable category marker are kept: better a candidate
    /// the caller re-checks than a missed match.
    pub fn candidate_drivers(
        &self,
        pickup_lat: f64,
        pickup_lng: f64,
        zone_id: &str,
        category: Option<VehicleCategory>,
    ) -> CandidateOutcome {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return CandidateOutcome::Disabled;
        };
        if !settings.enabled || !settings.dispatch_enabled {
            return CandidateOutcome::Disabled;
        }

        let origin = grid::encode(pickup_lat, pickup_lng, settings.grid_resolution());
        let ring = grid::neighbors(origin, settings.search_depth_k);
        let membership_keys: Vec<String> = ring
            .iter()
            .map(|&cell| keys::cell_drivers(zone_id, cell))
            .collect();

        let cell_sets = match self.store.set_members_many(&membership_keys) {
            Ok(cell_sets) => cell_sets,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "membership read failed; returning no candidates");
                return CandidateOutcome::Candidates(Vec::new());
            }
        };

        let mut seen = HashSet::new();
        let mut driver_ids: Vec<String> = Vec::new();
        for members in cell_sets {
            for driver_id in members {
                if seen.insert(driver_id.clone()) {
                    driver_ids.push(driver_id);
                }
            }
        }

        if let Some(category) = category {
            driver_ids = self.filter_by_category(zone_id, driver_ids, category);
        }
        CandidateOutcome::Candidates(driver_ids)
    }

    fn filter_by_category(
        &self,
        zone_id: &str,
        driver_ids: Vec<String>,
        category: VehicleCategory,
    ) -> Vec<String> {
        let tracked = match self.tracker.driver_categories(zone_id, &driver_ids) {
            Ok(tracked) => tracked,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "category marker read failed; skipping advisory filter");
                return driver_ids;
            }
        };
        driver_ids
            .into_iter()
            .zip(tracked)
            .filter(|(_, tracked)| tracked.is_none() || *tracked == Some(category))
            .map(|(driver_id, _)| driver_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsRepository, SettingsCache, ZoneSettings};
    use honeycomb_store::{ManualClock, MemoryStore};

    const ZONE: &str = "sofia";
    const LAT: f64 = 37.7749;
    const LNG: f64 = -122.4194;

    fn search_fixture(settings_row: ZoneSettings) -> (CandidateSearch, Arc<DriverCellTracker>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let repository = Arc::new(MemorySettingsRepository::new());
        repository.upsert(None, &settings_row).expect("settings row");
        let settings = Arc::new(SettingsCache::new(repository, store.clone(), clock));
        let tracker = Arc::new(DriverCellTracker::new(store.clone(), settings.clone()));
        (
            CandidateSearch::new(store, settings, tracker.clone()),
            tracker,
        )
    }

    /// Scatter one driver into the origin cell and one into each k=1
    /// neighbor by encoding points offset in a small circle.
    fn populate_ring(tracker: &DriverCellTracker) {
        tracker.update_driver_cell("d-origin", LAT, LNG, ZONE, VehicleCategory::Budget);
        for step in 0..12 {
            let angle = f64::from(step) * std::f64::consts::TAU / 12.0;
            let lat = LAT + 0.009 * angle.cos();
            let lng = LNG + 0.011 * angle.sin();
            tracker.update_driver_cell(&format!("d-{step}"), lat, lng, ZONE, VehicleCategory::Pro);
        }
    }

    #[test]
    fn union_covers_origin_and_neighbor_cells_without_duplicates() {
        let (search, tracker) = search_fixture(ZoneSettings::default());
        populate_ring(&tracker);

        let outcome = search.candidate_drivers(LAT, LNG, ZONE, None);
        let CandidateOutcome::Candidates(driver_ids) = outcome else {
            panic!("dispatch is enabled; expected candidates");
        };

        assert!(driver_ids.contains(&"d-origin".to_owned()));
        assert!(driver_ids.len() > 1, "ring neighbors must contribute candidates");
        let unique: HashSet<&String> = driver_ids.iter().collect();
        assert_eq!(unique.len(), driver_ids.len(), "candidates must be de-duplicated");
    }

    #[test]
    fn deeper_search_never_returns_fewer_candidates() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let repository = Arc::new(MemorySettingsRepository::new());
        repository
            .upsert(None, &ZoneSettings::default())
            .expect("settings row");
        let settings = Arc::new(SettingsCache::new(
            repository.clone(),
            store.clone(),
            clock,
        ));
        let tracker = Arc::new(DriverCellTracker::new(store.clone(), settings.clone()));
        let search = CandidateSearch::new(store, settings.clone(), tracker.clone());
        populate_ring(&tracker);

        let mut previous = 0;
        for k in 0..3 {
            repository
                .upsert(
                    None,
                    &ZoneSettings {
                        search_depth_k: k,
                        ..ZoneSettings::default()
                    },
                )
                .expect("settings row");
            settings.invalidate(None);

            let count = search
                .candidate_drivers(LAT, LNG, ZONE, None)
                .into_driver_ids()
                .len();
            assert!(count >= previous, "k={k} returned fewer candidates than k-1");
            previous = count;
        }
    }

    #[test]
    fn disabled_dispatch_is_an_explicit_signal() {
        let (search, tracker) = search_fixture(ZoneSettings {
            dispatch_enabled: false,
            ..ZoneSettings::default()
        });
        tracker.update_driver_cell("d-1", LAT, LNG, ZONE, VehicleCategory::Pro);

        // The tracker ran under enabled=true master switch, so membership
        // exists; dispatch alone being off must still signal fallback.
        let outcome = search.candidate_drivers(LAT, LNG, ZONE, None);
        assert!(outcome.is_disabled());
        assert!(outcome.into_driver_ids().is_empty());
    }

    #[test]
    fn no_settings_anywhere_means_disabled() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let settings = Arc::new(SettingsCache::new(
            Arc::new(MemorySettingsRepository::new()),
            store.clone(),
            clock,
        ));
        let tracker = Arc::new(DriverCellTracker::new(store.clone(), settings.clone()));
        let search = CandidateSearch::new(store, settings, tracker);

        assert!(search.candidate_drivers(LAT, LNG, ZONE, None).is_disabled());
    }

    #[test]
    fn category_filter_drops_mismatched_candidates() {
        let (search, tracker) = search_fixture(ZoneSettings::default());
        tracker.update_driver_cell("d-pro", LAT, LNG, ZONE, VehicleCategory::Pro);
        tracker.update_driver_cell("d-vip", LAT, LNG, ZONE, VehicleCategory::Vip);

        let driver_ids = search
            .candidate_drivers(LAT, LNG, ZONE, Some(VehicleCategory::Vip))
            .into_driver_ids();
        assert_eq!(driver_ids, vec!["d-vip".to_owned()]);
    }
}
