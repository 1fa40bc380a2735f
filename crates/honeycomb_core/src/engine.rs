//! Engine facade: wires the store, settings cache, and components together
//! and exposes the external entry points.
//!
//! Every method takes primitive coordinates and ids, returns plain data,
//! and is safe to call when honeycomb is disabled for the zone; callers
//! get an explicit disabled/neutral result, never a panic or an error.

use std::sync::Arc;

use tracing::warn;

use honeycomb_store::{Clock, SharedStore, SystemClock};

use crate::category::VehicleCategory;
use crate::demand::DemandRecorder;
use crate::grid;
use crate::heatmap::{CellStats, HeatmapEntry, HeatmapReporter, Hotspot};
use crate::pricing;
use crate::search::{CandidateOutcome, CandidateSearch};
use crate::settings::{SettingsCache, SettingsRepository};
use crate::supply::DriverCellTracker;

pub struct Honeycomb {
    settings: Arc<SettingsCache>,
    tracker: Arc<DriverCellTracker>,
    demand: Arc<DemandRecorder>,
    search: Arc<CandidateSearch>,
    heatmap: Arc<HeatmapReporter>,
}

impl Honeycomb {
    /// Wire up the engine against a shared store and settings repository.
    ///
    /// Subscribes this instance to settings invalidations broadcast by
    /// other instances; a failed subscription is logged and the instance
    /// falls back to TTL-based refresh alone.
    pub fn new(
        store: Arc<dyn SharedStore>,
        repository: Arc<dyn SettingsRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = Arc::new(SettingsCache::new(
            repository,
            store.clone(),
            clock.clone(),
        ));
        if let Err(err) = SettingsCache::subscribe_invalidations(&settings) {
            warn!(error = %err, "invalidation subscription failed; settings refresh on TTL only");
        }

        let tracker = Arc::new(DriverCellTracker::new(store.clone(), settings.clone()));
        let demand = Arc::new(DemandRecorder::new(
            store.clone(),
            settings.clone(),
            clock,
        ));
        let search = Arc::new(CandidateSearch::new(
            store.clone(),
            settings.clone(),
            tracker.clone(),
        ));
        let heatmap = Arc::new(HeatmapReporter::new(
            store,
            settings.clone(),
            tracker.clone(),
            demand.clone(),
        ));

        Self {
            settings,
            tracker,
            demand,
            search,
            heatmap,
        }
    }

    /// Engine over a system-clock store (production wiring).
    pub fn with_system_clock(
        store: Arc<dyn SharedStore>,
        repository: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self::new(store, repository, Arc::new(SystemClock))
    }

    /// Called by the driver-location subsystem on every accepted ping.
    pub fn update_driver_cell(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        zone_id: &str,
        category: VehicleCategory,
    ) {
        self.tracker
            .update_driver_cell(driver_id, lat, lng, zone_id, category);
    }

    /// Called by the driver-location subsystem on explicit offline.
    pub fn remove_driver_from_cells(&self, driver_id: &str, zone_id: &str) {
        self.tracker.remove_driver_from_cells(driver_id, zone_id);
    }

    /// Called by the trip subsystem when a ride request is created.
    pub fn record_demand(&self, lat: f64, lng: f64, zone_id: &str, category: VehicleCategory) {
        self.demand.record_demand(lat, lng, zone_id, category);
    }

    /// Called by the trip subsystem during matching.
    pub fn candidate_drivers(
        &self,
        pickup_lat: f64,
        pickup_lng: f64,
        zone_id: &str,
        category: Option<VehicleCategory>,
    ) -> CandidateOutcome {
        self.search
            .candidate_drivers(pickup_lat, pickup_lng, zone_id, category)
    }

    /// Surge multiplier for a quoted fare at the given pickup point.
    ///
    /// 1.0 whenever surge cannot or should not apply: settings absent,
    /// surge disabled, or the counters unreadable.
    pub fn surge_multiplier(&self, lat: f64, lng: f64, zone_id: &str) -> f64 {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return 1.0;
        };
        if !settings.enabled || !settings.surge_enabled {
            return 1.0;
        }
        let cell = grid::encode(lat, lng, settings.grid_resolution());
        let supply = match self.tracker.cell_supply(zone_id, cell) {
            Ok(supply) => supply,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "supply read failed; surge stays neutral");
                return 1.0;
            }
        };
        let demand = match self.demand.current_demand(zone_id, cell) {
            Ok(demand) => demand,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "demand read failed; surge stays neutral");
                return 1.0;
            }
        };
        pricing::surge_multiplier(&settings, pricing::imbalance(supply, demand))
    }

    /// Incentive for a cell at a known imbalance. 0.0 when incentives are
    /// disabled or the zone has no settings.
    pub fn driver_incentive(&self, imbalance: f64, zone_id: &str) -> f64 {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return 0.0;
        };
        if !settings.enabled {
            return 0.0;
        }
        pricing::driver_incentive(&settings, imbalance)
    }

    /// Zone heatmap for the operations dashboard.
    pub fn heatmap(&self, zone_id: &str, window_minutes: u64) -> Vec<HeatmapEntry> {
        self.heatmap.heatmap(zone_id, window_minutes)
    }

    /// Ranked hotspots for dashboards and driver incentive routing.
    pub fn hotspots(&self, zone_id: &str, limit: usize) -> Vec<Hotspot> {
        self.heatmap.hotspots(zone_id, limit)
    }

    /// In-app stats and hotspot guidance for a driver's position.
    pub fn cell_stats(&self, lat: f64, lng: f64, zone_id: &str) -> Option<CellStats> {
        self.heatmap.cell_stats(lat, lng, zone_id)
    }

    /// Called by the admin subsystem after writing settings rows. Drops
    /// local cache entries and broadcasts the invalidation to every other
    /// instance.
    pub fn invalidate_settings(&self, zone_id: Option<&str>) {
        self.settings.invalidate(zone_id);
    }
}
