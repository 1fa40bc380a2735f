//! Heatmap and hotspot reporting: the zone-wide imbalance view for
//! dashboards, and per-cell stats with relocation guidance for the driver
//! app.
//!
//! Derived data only: every entry is computed from the live supply and
//! demand counters at read time; nothing here is stored.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use honeycomb_store::{SharedStore, StoreResult};

use crate::category::VehicleCategory;
use crate::demand::DemandRecorder;
use crate::grid::{self, CellId};
use crate::keys;
use crate::pricing;
use crate::settings::{SettingsCache, ZoneSettings};
use crate::supply::DriverCellTracker;

/// Imbalance at which heatmap intensity saturates to 1.0. Exposed so
/// dashboard color scales stay stable across zones.
pub const INTENSITY_SATURATION: f64 = 3.0;

/// Minimum imbalance for a cell to count as a hotspot.
pub const HOTSPOT_MIN_IMBALANCE: f64 = 1.5;

/// Minimum current-window demand for a cell to count as a hotspot.
/// A single stray request does not make a hotspot.
pub const HOTSPOT_MIN_DEMAND: u64 = 2;

/// How many hotspots are ranked when looking for the nearest one.
const NEAREST_HOTSPOT_POOL: usize = 10;

/// Supply count for one vehicle category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySupply {
    pub category: VehicleCategory,
    pub count: u64,
}

/// One cell of the zone heatmap.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapEntry {
    pub cell_id: String,
    /// Cell center.
    pub lat: f64,
    pub lng: f64,
    pub supply: u64,
    pub demand: u64,
    pub imbalance: f64,
    /// Imbalance normalized against [`INTENSITY_SATURATION`], in [0, 1].
    pub intensity: f64,
    pub surge_multiplier: f64,
    pub supply_by_category: Vec<CategorySupply>,
}

/// A heatmap cell that qualifies as a hotspot, with the relocation
/// incentive a driver would earn there.
#[derive(Debug, Clone, Serialize)]
pub struct Hotspot {
    pub entry: HeatmapEntry,
    pub incentive: f64,
}

/// Guidance from a driver's position toward the nearest hotspot.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedDirection {
    pub cell_id: String,
    /// Great-circle initial bearing from the driver, degrees from north.
    pub bearing_deg: f64,
    /// Haversine distance from the driver to the hotspot center, km.
    pub distance_km: f64,
    pub incentive: f64,
}

/// Single-cell stats for a driver's current position.
#[derive(Debug, Clone, Serialize)]
pub struct CellStats {
    pub cell_id: String,
    pub supply: u64,
    pub demand: u64,
    pub imbalance: f64,
    pub surge_multiplier: f64,
    /// Effective radius the zone's candidate search covers from this cell.
    pub search_radius_km: f64,
    /// `None` when the zone currently has no hotspots.
    pub suggested_direction: Option<SuggestedDirection>,
}

pub struct HeatmapReporter {
    store: Arc<dyn SharedStore>,
    settings: Arc<SettingsCache>,
    tracker: Arc<DriverCellTracker>,
    demand: Arc<DemandRecorder>,
}

impl HeatmapReporter {
    pub fn new(
        store: Arc<dyn SharedStore>,
        settings: Arc<SettingsCache>,
        tracker: Arc<DriverCellTracker>,
        demand: Arc<DemandRecorder>,
    ) -> Self {
        Self {
            store,
            settings,
            tracker,
            demand,
        }
    }

    /// Zone-wide imbalance view over every cell with live supply, demand
    /// aggregated over the last `window_minutes`, sorted by imbalance
    /// descending.
    ///
    /// Cells below the zone's `min_drivers_to_color_cell` floor are dropped:
    /// a near-empty cell would let a viewer infer an individual driver's
    /// location. Empty when the heatmap is disabled or the scan fails.
    pub fn heatmap(&self, zone_id: &str, window_minutes: u64) -> Vec<HeatmapEntry> {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return Vec::new();
        };
        if !settings.enabled || !settings.heatmap_enabled {
            return Vec::new();
        }

        let live_keys = match self.store.keys_with_prefix(&keys::zone_cell_prefix(zone_id)) {
            Ok(live_keys) => live_keys,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "heatmap cell scan failed");
                return Vec::new();
            }
        };

        let mut entries: Vec<HeatmapEntry> = Vec::new();
        for key in live_keys {
            let Some(cell) = keys::cell_from_supply_key(&key, zone_id).and_then(CellId::parse)
            else {
                continue;
            };
            match self.entry_for_cell(zone_id, &settings, cell, window_minutes) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(err) => {
                    warn!(zone = zone_id, cell = %cell, error = %err, "heatmap cell read failed; cell skipped");
                }
            }
        }
        entries.sort_by(|a, b| b.imbalance.total_cmp(&a.imbalance));
        entries
    }

    fn entry_for_cell(
        &self,
        zone_id: &str,
        settings: &ZoneSettings,
        cell: CellId,
        window_minutes: u64,
    ) -> StoreResult<Option<HeatmapEntry>> {
        let supply = self.tracker.cell_supply(zone_id, cell)?;
        if supply < settings.min_drivers_to_color_cell {
            return Ok(None);
        }
        let demand = self.demand.demand_over_minutes(zone_id, cell, window_minutes)?;
        let imbalance = pricing::imbalance(supply, demand);
        let (lat, lng) = grid::decode(cell);
        let supply_by_category = self
            .tracker
            .cell_supply_by_category(zone_id, cell)?
            .into_iter()
            .map(|(category, count)| CategorySupply { category, count })
            .collect();

        Ok(Some(HeatmapEntry {
            cell_id: cell.to_string(),
            lat,
            lng,
            supply,
            demand,
            imbalance,
            intensity: (imbalance / INTENSITY_SATURATION).clamp(0.0, 1.0),
            surge_multiplier: pricing::surge_multiplier(settings, imbalance),
            supply_by_category,
        }))
    }

    /// The top `limit` hotspots of a zone: heatmap cells over the hotspot
    /// imbalance and demand floors, each with its relocation incentive.
    pub fn hotspots(&self, zone_id: &str, limit: usize) -> Vec<Hotspot> {
        let Some(settings) = self.settings.get(Some(zone_id)) else {
            return Vec::new();
        };
        let window_minutes = crate::demand::DEMAND_WINDOW.as_secs() / 60;
        let mut hotspots: Vec<Hotspot> = self
            .heatmap(zone_id, window_minutes)
            .into_iter()
            .filter(|entry| {
                entry.imbalance > HOTSPOT_MIN_IMBALANCE && entry.demand >= HOTSPOT_MIN_DEMAND
            })
            .map(|entry| {
                let incentive = pricing::driver_incentive(&settings, entry.imbalance);
                Hotspot { entry, incentive }
            })
            .collect();
        hotspots.truncate(limit);
        hotspots
    }

    /// Stats for the cell containing a driver's position, with guidance
    /// toward the nearest hotspot. `None` when the zone has honeycomb
    /// disabled. The guidance is `None` (not an error) when the zone has no
    /// hotspots right now.
    pub fn cell_stats(&self, lat: f64, lng: f64, zone_id: &str) -> Option<CellStats> {
        let settings = self.settings.get(Some(zone_id))?;
        if !settings.enabled {
            return None;
        }
        let cell = grid::encode(lat, lng, settings.grid_resolution());

        let supply = match self.tracker.cell_supply(zone_id, cell) {
            Ok(supply) => supply,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "cell stats supply read failed");
                return None;
            }
        };
        let demand = match self.demand.current_demand(zone_id, cell) {
            Ok(demand) => demand,
            Err(err) => {
                warn!(zone = zone_id, error = %err, "cell stats demand read failed");
                return None;
            }
        };
        let imbalance = pricing::imbalance(supply, demand);

        let suggested_direction = self
            .hotspots(zone_id, NEAREST_HOTSPOT_POOL)
            .into_iter()
            .map(|hotspot| {
                let distance_km =
                    grid::haversine_km(lat, lng, hotspot.entry.lat, hotspot.entry.lng);
                (hotspot, distance_km)
            })
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(hotspot, distance_km)| SuggestedDirection {
                bearing_deg: grid::initial_bearing_deg(
                    lat,
                    lng,
                    hotspot.entry.lat,
                    hotspot.entry.lng,
                ),
                distance_km,
                cell_id: hotspot.entry.cell_id,
                incentive: hotspot.incentive,
            });

        Some(CellStats {
            cell_id: cell.to_string(),
            supply,
            demand,
            imbalance,
            surge_multiplier: pricing::surge_multiplier(&settings, imbalance),
            search_radius_km: grid::search_radius_km(
                settings.grid_resolution(),
                settings.search_depth_k,
            ),
            suggested_direction,
        })
    }
}
