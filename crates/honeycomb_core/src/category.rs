use std::fmt;

use serde::{Deserialize, Serialize};

/// Vehicle category a driver is registered under.
///
/// Supply and demand counters keep a per-category subtotal next to the total;
/// cell membership itself is category-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleCategory {
    Budget,
    Pro,
    Vip,
}

impl VehicleCategory {
    pub const ALL: [VehicleCategory; 3] = [
        VehicleCategory::Budget,
        VehicleCategory::Pro,
        VehicleCategory::Vip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleCategory::Budget => "budget",
            VehicleCategory::Pro => "pro",
            VehicleCategory::Vip => "vip",
        }
    }

    /// Parse the stored form. Unknown strings map to `None` (corrupt or
    /// future-version markers are skipped, not fatal).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "budget" => Some(VehicleCategory::Budget),
            "pro" => Some(VehicleCategory::Pro),
            "vip" => Some(VehicleCategory::Vip),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
