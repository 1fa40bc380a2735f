//! Grid codec: H3-based geographic cell encoding and neighbor expansion.
//!
//! This module provides:
//!
//! - **CellId**: stable identifier for one hex cell at one resolution
//! - **encode/decode**: coordinate ↔ cell mapping, total over the lat/lng
//!   domain, with a sentinel decode for malformed identifiers
//! - **K-ring queries**: all cells within K grid distance, LRU-cached
//! - **Geodesic helpers**: haversine distance and initial bearing
//!
//! Zones configure resolutions 7–9; resolution 8 (~460 m edges) suits most
//! city deployments.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;

/// Coarsest grid resolution a zone may configure (~1.2 km edges).
pub const MIN_RESOLUTION: u8 = 7;

/// Finest grid resolution a zone may configure (~170 m edges).
pub const MAX_RESOLUTION: u8 = 9;

/// Coordinates reported for identifiers that fail to parse. Callers use
/// decoded centers only for display and direction hints, so a malformed id
/// degrades to a harmless point instead of an error.
pub const SENTINEL_COORD: (f64, f64) = (0.0, 0.0);

/// Identifier of one grid cell. The string form (H3 hex, via
/// `Display`/`parse`) is what goes into store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(CellIndex);

impl CellId {
    pub fn index(self) -> CellIndex {
        self.0
    }

    pub fn resolution(self) -> Resolution {
        self.0.resolution()
    }

    /// Parse the stored string form (lowercase hex, the canonical H3
    /// representation). `None` for malformed identifiers.
    pub fn parse(raw: &str) -> Option<Self> {
        let bits = u64::from_str_radix(raw, 16).ok()?;
        CellIndex::try_from(bits).ok().map(CellId)
    }
}

impl From<CellIndex> for CellId {
    fn from(index: CellIndex) -> Self {
        CellId(index)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", u64::from(self.0))
    }
}

/// Map a coordinate to its cell at the given resolution.
///
/// Total and deterministic: the same (lat, lng, resolution) always yields the
/// same cell. Non-finite coordinates (which cannot name any point on the
/// globe) encode the sentinel coordinate instead of panicking; coordinate
/// validation is an upstream concern.
pub fn encode(lat: f64, lng: f64, resolution: Resolution) -> CellId {
    let coord = LatLng::new(lat, lng).unwrap_or_else(|_| sentinel_coord());
    CellId(coord.to_cell(resolution))
}

/// Approximate center of a cell, in (lat, lng) degrees.
pub fn decode(cell: CellId) -> (f64, f64) {
    let center: LatLng = cell.0.into();
    (center.lat(), center.lng())
}

/// Decode a stored identifier string. Malformed input yields
/// [`SENTINEL_COORD`] rather than an error.
pub fn decode_str(raw: &str) -> (f64, f64) {
    match CellId::parse(raw) {
        Some(cell) => decode(cell),
        None => SENTINEL_COORD,
    }
}

fn sentinel_coord() -> LatLng {
    LatLng::new(SENTINEL_COORD.0, SENTINEL_COORD.1).expect("sentinel is a valid coordinate")
}

/// K-ring cache shared by candidate search and the pricing read path.
struct RingCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl RingCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(1_000).expect("cache size must be non-zero"),
            )),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(_) => return origin.grid_disk::<Vec<_>>(k), // Fallback: compute without cache if mutex poisoned
        };
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

static RING_CACHE: OnceLock<RingCache> = OnceLock::new();

fn ring_cache() -> &'static RingCache {
    RING_CACHE.get_or_init(RingCache::new)
}

/// All cells within `k` grid distance of `origin`, origin included.
///
/// Ring `k` is a superset of ring `k - 1`; `k = 0` is `{origin}` alone.
/// Results are deduplicated by construction and cached in an LRU keyed by
/// (origin, k).
pub fn neighbors(origin: CellId, k: u32) -> Vec<CellId> {
    ring_cache()
        .get_or_compute(origin.0, k)
        .into_iter()
        .map(CellId)
        .collect()
}

/// Average hex edge length per resolution, in km.
///
/// Fixed lookup for the zone-configurable range; other resolutions scale
/// from resolution 9 by the √7 aperture ratio per step.
pub fn edge_length_km(resolution: Resolution) -> f64 {
    match resolution {
        Resolution::Seven => 1.2207,
        Resolution::Eight => 0.4614,
        Resolution::Nine => 0.1744,
        other => {
            let steps = i32::from(MAX_RESOLUTION) - i32::from(u8::from(other));
            0.1744 * 7.0_f64.sqrt().powi(steps)
        }
    }
}

/// Rough radius in km covered by a k-ring search at the given resolution:
/// k rings of cells, each spanning about two edge lengths, around the origin
/// cell's own half-width.
pub fn search_radius_km(resolution: Resolution, k: u32) -> f64 {
    edge_length_km(resolution) * (2.0 * f64::from(k) + 1.0)
}

/// Haversine distance in km between two coordinates.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lng1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lng2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    6371.0 * c
}

/// Distance in km between two cell centers.
pub fn cell_distance_km(a: CellId, b: CellId) -> f64 {
    let (lat1, lng1) = decode(a);
    let (lat2, lng2) = decode(b);
    haversine_km(lat1, lng1, lat2, lng2)
}

/// Great-circle initial bearing from one coordinate to another, in degrees
/// clockwise from north, normalized to [0, 360).
pub fn initial_bearing_deg(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (lat1, lon1) = (lat1.to_radians(), lng1.to_radians());
    let (lat2, lon2) = (lat2.to_radians(), lng2.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}
