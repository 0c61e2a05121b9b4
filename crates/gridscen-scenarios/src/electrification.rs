//! Demand electrification overlays.
//!
//! An overlay lists, per end use, the share of each technology's canonical
//! profile that becomes additional demand:
//!
//! ```yaml
//! building:
//!   grid:
//!     res_heating: {standard_heat_pump_v1: 0.3}
//!   zone:
//!     East:
//!       res_cooking: {advanced_heat_pump_v2: 0.7}
//! ```
//!
//! A zone-level end use replaces the grid-level shares of that end use in
//! that zone.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use gridscen_core::{Grid, GridError, GridResult, ZoneId};
use gridscen_ts::{Profile, DEMAND_INDEX};

use crate::transform_profile::ProfileSource;

/// Classes of electrified demand recognized as change-table keys.
pub const ELECTRIFICATION_KINDS: [&str; 2] = ["building", "transportation"];

/// `tech -> share`
pub type TechShares = BTreeMap<String, f64>;
/// `end_use -> tech -> share`
pub type EndUseShares = BTreeMap<String, TechShares>;

pub fn is_electrification_kind(key: &str) -> bool {
    ELECTRIFICATION_KINDS.contains(&key)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElectrificationSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub grid: EndUseShares,
    /// Keyed by load zone name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone: BTreeMap<String, EndUseShares>,
}

/// Each share must lie in `[0, 1]` and the shares of one end use may not
/// add up to more than 1.
pub fn check_shares(shares: &EndUseShares) -> GridResult<()> {
    for (end_use, techs) in shares {
        let mut total = 0.0;
        for (tech, share) in techs {
            if !share.is_finite() || !(0.0..=1.0).contains(share) {
                return Err(GridError::invalid(format!(
                    "share of {end_use}/{tech} must be within [0, 1], got {share}"
                )));
            }
            total += share;
        }
        if total > 1.0 + 1e-9 {
            return Err(GridError::invalid(format!(
                "shares of end use {end_use} add up to {total}, more than 1"
            )));
        }
    }
    Ok(())
}

impl ElectrificationSpec {
    pub fn is_empty(&self) -> bool {
        self.grid.is_empty() && self.zone.is_empty()
    }

    /// Check shares and that every zone belongs to `grid`.
    pub fn validate(&self, grid: &Grid) -> GridResult<()> {
        check_shares(&self.grid)?;
        for (zone, shares) in &self.zone {
            if !grid.zone2id.contains_key(zone) {
                return Err(GridError::unknown("zone", zone));
            }
            check_shares(shares)?;
        }
        Ok(())
    }

    /// Fold `other` in; its end uses replace ours where both are present.
    pub fn merge(&mut self, other: ElectrificationSpec) {
        self.grid.extend(other.grid);
        for (zone, shares) in other.zone {
            self.zone.entry(zone).or_default().extend(shares);
        }
    }

    /// Every `(end_use, tech)` pair mentioned at either level.
    pub fn technologies(&self) -> BTreeSet<(String, String)> {
        std::iter::once(&self.grid)
            .chain(self.zone.values())
            .flat_map(|shares| {
                shares.iter().flat_map(|(end_use, techs)| {
                    techs.keys().map(move |tech| (end_use.clone(), tech.clone()))
                })
            })
            .collect()
    }
}

/// Names of the grid's load zones that hold no bus.
pub fn zones_without_buses(grid: &Grid) -> Vec<&str> {
    let occupied: BTreeSet<ZoneId> = grid.bus.values().map(|b| b.zone_id).collect();
    grid.zone2id
        .iter()
        .filter(|(_, id)| !occupied.contains(id))
        .map(|(name, _)| name.as_str())
        .collect()
}

/// Additional demand of one electrification class, one column per zone
/// holding buses in `grid`. Returns `None` when the overlay is empty.
pub fn electrified_demand(
    kind: &str,
    spec: &ElectrificationSpec,
    grid: &Grid,
    source: &dyn ProfileSource,
) -> Result<Option<Profile>> {
    if spec.is_empty() {
        return Ok(None);
    }
    let zones: BTreeSet<ZoneId> = grid.bus.values().map(|b| b.zone_id).collect();
    let skipped = zones_without_buses(grid);
    if !skipped.is_empty() {
        warn!(kind, zones = ?skipped, "load zones without buses get no electrified demand");
    }
    let mut total: Option<Profile> = None;
    for (end_use, tech) in spec.technologies() {
        let profile = source.electrification_profile(kind, &end_use, &tech)?;
        let mut contribution = profile.empty_like();
        contribution.set_index_name(DEMAND_INDEX);

        let grid_share = spec
            .grid
            .get(&end_use)
            .and_then(|techs| techs.get(&tech))
            .copied();
        for zone_id in &zones {
            let override_shares = grid
                .zone_name(*zone_id)
                .and_then(|name| spec.zone.get(name))
                .and_then(|s| s.get(&end_use));
            let share = match override_shares {
                Some(techs) => techs.get(&tech).copied().unwrap_or(0.0),
                None => grid_share.unwrap_or(0.0),
            };
            let values = match profile.column(zone_id.value()) {
                Some(column) => column.iter().map(|v| v * share).collect(),
                None if share == 0.0 => vec![0.0; profile.len()],
                None => {
                    return Err(anyhow!(
                        "{kind} profile {end_use}_{tech} has no column for zone {zone_id}"
                    ))
                }
            };
            contribution.insert_column(zone_id.value(), values)?;
        }
        debug!(kind, end_use = %end_use, tech = %tech, "electrification contribution");

        match total.as_mut() {
            Some(sum) => sum.add_assign(&contribution)?,
            None => total = Some(contribution),
        }
    }
    Ok(total)
}
