//! Store key schema.
//!
//! Everything the engine writes lives under `hc:{zone}:...` so one shared
//! store can serve many zones, and a zone's live cells can be enumerated
//! with a single prefix scan.

use crate::category::VehicleCategory;
use crate::grid::CellId;

/// Set of driver ids currently in a cell.
pub(crate) fn cell_drivers(zone_id: &str, cell: CellId) -> String {
    format!("hc:{zone_id}:cell:{cell}:drivers")
}

/// Total supply counter for a cell.
pub(crate) fn cell_supply(zone_id: &str, cell: CellId) -> String {
    format!("hc:{zone_id}:cell:{cell}:supply")
}

/// Per-category supply counter for a cell.
pub(crate) fn cell_supply_category(zone_id: &str, cell: CellId, category: VehicleCategory) -> String {
    format!("hc:{zone_id}:cell:{cell}:supply:{category}")
}

/// Total demand counter for a (cell, window) bucket.
pub(crate) fn cell_demand(zone_id: &str, cell: CellId, window_start_ms: u64) -> String {
    format!("hc:{zone_id}:cell:{cell}:demand:{window_start_ms}")
}

/// Per-category demand counter for a (cell, window) bucket.
pub(crate) fn cell_demand_category(
    zone_id: &str,
    cell: CellId,
    window_start_ms: u64,
    category: VehicleCategory,
) -> String {
    format!("hc:{zone_id}:cell:{cell}:demand:{window_start_ms}:{category}")
}

/// Last known cell of a driver.
pub(crate) fn driver_cell(zone_id: &str, driver_id: &str) -> String {
    format!("hc:{zone_id}:driver:{driver_id}:cell")
}

/// Vehicle category a driver was last tracked under.
pub(crate) fn driver_category(zone_id: &str, driver_id: &str) -> String {
    format!("hc:{zone_id}:driver:{driver_id}:category")
}

/// Prefix of every per-cell key in a zone (heatmap scans).
pub(crate) fn zone_cell_prefix(zone_id: &str) -> String {
    format!("hc:{zone_id}:cell:")
}

/// Extract the cell id from a total-supply key found by a prefix scan.
/// Per-category keys and other suffixes return `None`.
pub(crate) fn cell_from_supply_key<'a>(key: &'a str, zone_id: &str) -> Option<&'a str> {
    key.strip_prefix(&zone_cell_prefix(zone_id))?
        .strip_suffix(":supply")
        .filter(|cell| !cell.contains(':'))
}
