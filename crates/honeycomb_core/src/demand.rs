//! Demand recorder: per-cell, per-time-window ride request counters.
//!
//! Windows are fixed-width buckets keyed by their start time. Buckets stay
//! readable for a grace period after closing so imbalance reads spanning a
//! window boundary do not see a cliff.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use honeycomb_store::{Clock, SharedStore, StoreBatch, StoreResult};

use crate::category::VehicleCategory;
use crate::grid::{self, CellId};
use crate::keys;
use crate::settings::SettingsCache;

/// Width of one demand window.
pub const DEMAND_WINDOW: Duration = Duration::from_secs(5 * 60);

/// How long a bucket stays readable after its window closes.
pub const DEMAND_WINDOW_GRACE: Duration = Duration::from_secs(2 * 60);

/// Start of the window containing `now_ms`.
pub fn window_start_ms(now_ms: u64) -> u64 {
    let width = DEMAND_WINDOW.as_millis() as u64;
    (now_ms / width) * width
}

/// Start times of every window overlapping the last `minutes` minutes,
/// oldest first, current window included.
pub fn windows_covering(now_ms: u64, minutes: u64) -> Vec<u64> {
    let width = DEMAND_WINDOW.as_millis() as u64;
    let oldest = window_start_ms(now_ms.saturating_sub(minutes * 60_000));
    let newest = window_start_ms(now_ms);
    (oldest..=newest).step_by(width as usize).collect()
}

pub struct DemandRecorder {
    store: Arc<dyn SharedStore>,
    settings: Arc<SettingsCache>,
    clock: Arc<dyn Clock>,
}

impl DemandRecorder {
    pub fn new(
        store: Arc<dyn SharedStore>,
        settings: Arc<SettingsCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Count one ride request originating at the given coordinates.
    ///
    /// No-op when the zone has honeycomb disabled. Total and per-category
    /// counters for the current (cell, window) bucket are incremented in one
    /// atomic batch; a failed batch is dropped and logged.
    pub fn record_demand(&self, lat: f64, lng: f64, zone_id: &str, category: VehicleCategory) {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return;
        };
        if !settings.enabled {
            return;
        }
        let cell = grid::encode(lat, lng, settings.grid_resolution());
        let window = window_start_ms(self.clock.now_ms());
        let ttl = DEMAND_WINDOW + DEMAND_WINDOW_GRACE;

        let total_key = keys::cell_demand(zone_id, cell, window);
        let category_key = keys::cell_demand_category(zone_id, cell, window, category);
        let batch = StoreBatch::new()
            .incr_by(total_key.as_str(), 1)
            .incr_by(category_key.as_str(), 1)
            .expire(total_key.as_str(), ttl)
            .expire(category_key.as_str(), ttl);

        if let Err(err) = self.store.apply(batch) {
            warn!(zone = zone_id, error = %err, "demand increment batch failed; request not counted");
        }
    }

    /// Demand total for a cell in the current window.
    pub fn current_demand(&self, zone_id: &str, cell: CellId) -> StoreResult<u64> {
        let window = window_start_ms(self.clock.now_ms());
        let count = self
            .store
            .counter(&keys::cell_demand(zone_id, cell, window))?;
        Ok(count.max(0) as u64)
    }

    /// Demand total for a cell summed over every window overlapping the
    /// last `minutes` minutes.
    pub fn demand_over_minutes(&self, zone_id: &str, cell: CellId, minutes: u64) -> StoreResult<u64> {
        let window_keys: Vec<String> = windows_covering(self.clock.now_ms(), minutes)
            .into_iter()
            .map(|window| keys::cell_demand(zone_id, cell, window))
            .collect();
        let mut total: u64 = 0;
        for raw in self.store.get_many(&window_keys)? {
            if let Some(count) = raw.as_deref().and_then(|raw| raw.parse::<i64>().ok()) {
                total += count.max(0) as u64;
            }
        }
        Ok(total)
    }

    /// Per-category demand breakdown for the current window.
    pub fn current_demand_by_category(
        &self,
        zone_id: &str,
        cell: CellId,
    ) -> StoreResult<Vec<(VehicleCategory, u64)>> {
        let window = window_start_ms(self.clock.now_ms());
        VehicleCategory::ALL
            .iter()
            .map(|&category| {
                let count = self
                    .store
                    .counter(&keys::cell_demand_category(zone_id, cell, window, category))?;
                Ok((category, count.max(0) as u64))
            })
            .collect()
    }
}
