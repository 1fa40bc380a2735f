//! Zone settings: the per-zone configuration record, its backing
//! repository, and the TTL cache with cross-instance invalidation.
//!
//! Settings rows are persisted as JSON documents. Reads on the hot dispatch
//! path never block on the repository except on a cold cache miss; absent
//! settings mean "all honeycomb features disabled", never an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use h3o::Resolution;
use serde::{Deserialize, Serialize};
use tracing::warn;

use honeycomb_store::{Clock, SharedStore, StoreError, StoreResult};

use crate::grid::{MAX_RESOLUTION, MIN_RESOLUTION};

/// How long a loaded settings row (or a confirmed absence) stays cached.
pub const SETTINGS_CACHE_TTL_MS: u64 = 5 * 60 * 1_000;

/// Broadcast channel carrying invalidation messages between instances.
pub const INVALIDATION_CHANNEL: &str = "honeycomb:settings:invalidated";

/// Per-zone honeycomb configuration. A row with `zone_id = None` in the
/// repository acts as the global fallback for zones without their own row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneSettings {
    /// Master switch; off disables every honeycomb feature for the zone.
    pub enabled: bool,
    /// Candidate search (dispatch acceleration).
    pub dispatch_enabled: bool,
    /// Heatmap and hotspot reporting.
    pub heatmap_enabled: bool,
    /// Surge multiplier computation.
    pub surge_enabled: bool,
    /// Driver relocation incentives.
    pub incentives_enabled: bool,
    /// Grid resolution (7–9; clamped on use).
    pub resolution: u8,
    /// Neighbor-ring radius for candidate search.
    pub search_depth_k: u32,
    /// Privacy floor: cells with fewer drivers are excluded from heatmaps.
    pub min_drivers_to_color_cell: u64,
    /// Imbalance at which surge starts.
    pub surge_threshold: f64,
    /// Maximum surge multiplier.
    pub surge_cap: f64,
    /// Multiplier increase per surge step.
    pub surge_step: f64,
    /// Imbalance at which relocation incentives start.
    pub incentive_threshold: f64,
    /// Cap on the per-cell incentive amount.
    pub max_incentive_amount: f64,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_enabled: true,
            heatmap_enabled: true,
            surge_enabled: true,
            incentives_enabled: true,
            resolution: 8,
            search_depth_k: 1,
            min_drivers_to_color_cell: 3,
            surge_threshold: 1.5,
            surge_cap: 2.0,
            surge_step: 0.1,
            incentive_threshold: 1.5,
            max_incentive_amount: 50.0,
        }
    }
}

impl ZoneSettings {
    /// Configured resolution clamped into the supported range.
    pub fn grid_resolution(&self) -> Resolution {
        let clamped = self.resolution.clamp(MIN_RESOLUTION, MAX_RESOLUTION);
        Resolution::try_from(clamped).expect("clamped resolution is valid")
    }
}

/// Backing store for settings rows, keyed by zone (`None` = global row).
pub trait SettingsRepository: Send + Sync {
    fn load(&self, zone_id: Option<&str>) -> StoreResult<Option<ZoneSettings>>;
}

/// Repository holding rows as JSON documents in memory. Used by tests and
/// single-node deployments; production wires the relational row store here.
#[derive(Default)]
pub struct MemorySettingsRepository {
    rows: Mutex<HashMap<Option<String>, String>>,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, zone_id: Option<&str>, settings: &ZoneSettings) -> StoreResult<()> {
        let row = serde_json::to_string(settings)
            .map_err(|err| StoreError::Encoding(err.to_string()))?;
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Unavailable("settings rows mutex poisoned".into()))?;
        rows.insert(zone_id.map(str::to_owned), row);
        Ok(())
    }

    pub fn remove(&self, zone_id: Option<&str>) -> StoreResult<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Unavailable("settings rows mutex poisoned".into()))?;
        rows.remove(&zone_id.map(str::to_owned));
        Ok(())
    }
}

impl SettingsRepository for MemorySettingsRepository {
    fn load(&self, zone_id: Option<&str>) -> StoreResult<Option<ZoneSettings>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Unavailable("settings rows mutex poisoned".into()))?;
        match rows.get(&zone_id.map(str::to_owned)) {
            None => Ok(None),
            Some(row) => serde_json::from_str(row)
                .map(Some)
                .map_err(|err| StoreError::Encoding(err.to_string())),
        }
    }
}

/// Message broadcast when an administrator rewrites a zone's settings.
/// `zone_id = None` means every instance drops its whole cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvalidationMessage {
    zone_id: Option<String>,
}

struct CachedRow {
    /// `None` caches a confirmed absence so unconfigured zones do not hit
    /// the repository on every ping.
    settings: Option<ZoneSettings>,
    loaded_at_ms: u64,
}

/// Read-through settings cache with a 5-minute TTL and cross-instance
/// invalidation over the shared store's broadcast channel.
pub struct SettingsCache {
    repository: Arc<dyn SettingsRepository>,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<Option<String>, CachedRow>>,
}

impl SettingsCache {
    pub fn new(
        repository: Arc<dyn SettingsRepository>,
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            store,
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Settings for a zone: cache, then zone row, then global fallback row.
    /// `None` means no row exists anywhere (or the repository is down) and
    /// the caller must treat every honeycomb feature as disabled.
    pub fn get(&self, zone_id: Option<&str>) -> Option<ZoneSettings> {
        let now_ms = self.clock.now_ms();
        let cache_key = zone_id.map(str::to_owned);

        if let Ok(rows) = self.rows.lock() {
            if let Some(row) = rows.get(&cache_key) {
                if now_ms.saturating_sub(row.loaded_at_ms) < SETTINGS_CACHE_TTL_MS {
                    return row.settings.clone();
                }
            }
        }

        let loaded = self.load_with_fallback(zone_id);
        if let Ok(mut rows) = self.rows.lock() {
            rows.insert(
                cache_key,
                CachedRow {
                    settings: loaded.clone(),
                    loaded_at_ms: now_ms,
                },
            );
        }
        loaded
    }

    fn load_with_fallback(&self, zone_id: Option<&str>) -> Option<ZoneSettings> {
        match self.repository.load(zone_id) {
            Ok(Some(settings)) => return Some(settings),
            Ok(None) => {}
            Err(err) => {
                warn!(zone = zone_id.unwrap_or("<global>"), error = %err, "settings load failed; treating zone as disabled");
                return None;
            }
        }
        if zone_id.is_none() {
            return None;
        }
        match self.repository.load(None) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(zone = zone_id.unwrap_or("<global>"), error = %err, "global settings fallback load failed; treating zone as disabled");
                None
            }
        }
    }

    /// Drop cached rows and broadcast the invalidation to other instances.
    ///
    /// `None` drops everything. The publish is fire-and-forget: a failed
    /// broadcast is logged, the local drop has already happened.
    pub fn invalidate(&self, zone_id: Option<&str>) {
        self.drop_rows(zone_id);
        let message = InvalidationMessage {
            zone_id: zone_id.map(str::to_owned),
        };
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to encode invalidation message");
                return;
            }
        };
        if let Err(err) = self.store.publish(INVALIDATION_CHANNEL, &payload) {
            warn!(error = %err, "settings invalidation broadcast failed; other instances will refresh on TTL");
        }
    }

    /// Subscribe an instance to invalidations broadcast by others.
    /// Call once at startup; the subscription holds only a weak reference.
    pub fn subscribe_invalidations(cache: &Arc<SettingsCache>) -> StoreResult<()> {
        let weak = Arc::downgrade(cache);
        cache.store.subscribe(
            INVALIDATION_CHANNEL,
            Box::new(move |payload| {
                if let Some(cache) = weak.upgrade() {
                    cache.handle_invalidation(payload);
                }
            }),
        )
    }

    fn handle_invalidation(&self, payload: &str) {
        match serde_json::from_str::<InvalidationMessage>(payload) {
            Ok(message) => self.drop_rows(message.zone_id.as_deref()),
            Err(err) => {
                // An unreadable message still means something changed.
                warn!(error = %err, "malformed invalidation payload; dropping all cached settings");
                self.drop_rows(None);
            }
        }
    }

    fn drop_rows(&self, zone_id: Option<&str>) {
        let Ok(mut rows) = self.rows.lock() else {
            return;
        };
        match zone_id {
            Some(zone) => {
                rows.remove(&Some(zone.to_owned()));
            }
            None => rows.clear(),
        }
    }
}
