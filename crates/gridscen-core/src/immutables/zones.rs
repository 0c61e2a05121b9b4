//! Load-zone tables and the area resolver.
//!
//! A zone table is the authority for everything geographic above the bus:
//! which division (state or country) a load zone sits in, which
//! interconnect it belongs to, and the aliases used to name unions of
//! interconnects (`Texas_Western`, `USA`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{GridError, GridResult};
use crate::ids::ZoneId;

/// What the `division` column of a zone table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivisionKind {
    State,
    Country,
}

/// One row of `zone.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub division: String,
    pub interconnect: String,
    pub time_zone: String,
    pub abv: String,
}

/// Kinds of area accepted by [`ZoneTable::area_to_loadzone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaType {
    Loadzone,
    /// State or country, depending on the model
    Division,
    Abv,
    Interconnect,
    All,
}

impl fmt::Display for AreaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AreaType::Loadzone => "loadzone",
            AreaType::Division => "division",
            AreaType::Abv => "abv",
            AreaType::Interconnect => "interconnect",
            AreaType::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for AreaType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loadzone" => Ok(AreaType::Loadzone),
            "division" | "state" | "country" => Ok(AreaType::Division),
            "abv" | "state_abbr" | "country_abbr" => Ok(AreaType::Abv),
            "interconnect" => Ok(AreaType::Interconnect),
            "all" => Ok(AreaType::All),
            other => Err(GridError::invalid(format!("unknown area type '{other}'"))),
        }
    }
}

/// Zone table plus every mapping derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneTable {
    pub division_kind: DivisionKind,
    /// Alias naming the union of every interconnect of the model
    pub all_alias: String,
    pub zones: BTreeMap<ZoneId, Zone>,
    pub loadzone2id: BTreeMap<String, ZoneId>,
    pub division2abv: BTreeMap<String, String>,
    pub abv2division: BTreeMap<String, String>,
    pub division2loadzone: BTreeMap<String, BTreeSet<String>>,
    pub abv2loadzone: BTreeMap<String, BTreeSet<String>>,
    pub interconnect2loadzone: BTreeMap<String, BTreeSet<String>>,
    pub interconnect2id: BTreeMap<String, BTreeSet<ZoneId>>,
    pub interconnect2abv: BTreeMap<String, BTreeSet<String>>,
    pub loadzone2interconnect: BTreeMap<String, String>,
    pub loadzone2division: BTreeMap<String, String>,
    /// Interconnect names and the aliases of every union of them
    pub name2interconnect: BTreeMap<String, BTreeSet<String>>,
}

impl ZoneTable {
    /// Build the table and its derived mappings. Zone ids and zone names
    /// must both be unique.
    pub fn new(
        division_kind: DivisionKind,
        all_alias: &str,
        zones: impl IntoIterator<Item = Zone>,
    ) -> GridResult<Self> {
        let mut table = ZoneTable {
            division_kind,
            all_alias: all_alias.to_string(),
            zones: BTreeMap::new(),
            loadzone2id: BTreeMap::new(),
            division2abv: BTreeMap::new(),
            abv2division: BTreeMap::new(),
            division2loadzone: BTreeMap::new(),
            abv2loadzone: BTreeMap::new(),
            interconnect2loadzone: BTreeMap::new(),
            interconnect2id: BTreeMap::new(),
            interconnect2abv: BTreeMap::new(),
            loadzone2interconnect: BTreeMap::new(),
            loadzone2division: BTreeMap::new(),
            name2interconnect: BTreeMap::new(),
        };
        for zone in zones {
            if table.zones.contains_key(&zone.zone_id) {
                return Err(GridError::invalid(format!(
                    "duplicate zone id {} in zone table",
                    zone.zone_id
                )));
            }
            if table.loadzone2id.contains_key(&zone.zone_name) {
                return Err(GridError::invalid(format!(
                    "duplicate zone name '{}' in zone table",
                    zone.zone_name
                )));
            }
            table.index(&zone);
            table.zones.insert(zone.zone_id, zone);
        }
        table.name2interconnect = interconnect_aliases(
            table.interconnect2loadzone.keys().cloned().collect(),
            all_alias,
        );
        Ok(table)
    }

    fn index(&mut self, zone: &Zone) {
        let name = zone.zone_name.clone();
        self.loadzone2id.insert(name.clone(), zone.zone_id);
        self.division2abv
            .insert(zone.division.clone(), zone.abv.clone());
        self.abv2division
            .insert(zone.abv.clone(), zone.division.clone());
        self.division2loadzone
            .entry(zone.division.clone())
            .or_default()
            .insert(name.clone());
        self.abv2loadzone
            .entry(zone.abv.clone())
            .or_default()
            .insert(name.clone());
        self.interconnect2loadzone
            .entry(zone.interconnect.clone())
            .or_default()
            .insert(name.clone());
        self.interconnect2id
            .entry(zone.interconnect.clone())
            .or_default()
            .insert(zone.zone_id);
        self.interconnect2abv
            .entry(zone.interconnect.clone())
            .or_default()
            .insert(zone.abv.clone());
        self.loadzone2interconnect
            .insert(name.clone(), zone.interconnect.clone());
        self.loadzone2division.insert(name, zone.division.clone());
    }

    pub fn zone(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn zone_id(&self, name: &str) -> Option<ZoneId> {
        self.loadzone2id.get(name).copied()
    }

    pub fn interconnect_of(&self, id: ZoneId) -> Option<&str> {
        self.zones.get(&id).map(|z| z.interconnect.as_str())
    }

    /// Expand an interconnect name or alias into concrete interconnects.
    pub fn expand_interconnect(&self, name: &str) -> GridResult<BTreeSet<String>> {
        self.name2interconnect
            .get(name)
            .cloned()
            .ok_or_else(|| GridError::unknown("interconnect", name))
    }

    /// Canonical name of a set of interconnects (`Texas_Western`, `USA`, ...).
    pub fn interconnect_to_name(&self, interconnects: &[String]) -> GridResult<String> {
        let mut wanted = BTreeSet::new();
        for name in interconnects {
            wanted.extend(self.expand_interconnect(name)?);
        }
        self.name2interconnect
            .iter()
            .filter(|(_, members)| **members == wanted)
            .map(|(name, _)| name.clone())
            .min_by_key(|name| name.len())
            .ok_or_else(|| GridError::invalid("empty interconnect selection"))
    }

    /// Resolve an area to the set of load zone names it covers.
    ///
    /// Without `area_type` the name is tried, in order, as a division, a load
    /// zone, a division abbreviation, an interconnect and finally `all`.
    pub fn area_to_loadzone(
        &self,
        area: &str,
        area_type: Option<AreaType>,
    ) -> GridResult<BTreeSet<String>> {
        match area_type {
            Some(kind) => self
                .resolve(area, kind)
                .ok_or_else(|| GridError::invalid(format!("'{area}' is not a valid {kind}"))),
            None => [
                AreaType::Division,
                AreaType::Loadzone,
                AreaType::Abv,
                AreaType::Interconnect,
                AreaType::All,
            ]
            .into_iter()
            .find_map(|kind| self.resolve(area, kind))
            .ok_or_else(|| GridError::invalid(format!("'{area}' is not a recognized area"))),
        }
    }

    fn resolve(&self, area: &str, kind: AreaType) -> Option<BTreeSet<String>> {
        match kind {
            AreaType::Loadzone => self
                .loadzone2id
                .contains_key(area)
                .then(|| BTreeSet::from([area.to_string()])),
            AreaType::Division => self.division2loadzone.get(area).cloned(),
            AreaType::Abv => self
                .abv2loadzone
                .get(area)
                .or_else(|| self.abv2loadzone.get(&area.to_ascii_uppercase()))
                .cloned(),
            AreaType::Interconnect => self.name2interconnect.get(area).map(|members| {
                members
                    .iter()
                    .filter_map(|ic| self.interconnect2loadzone.get(ic))
                    .flatten()
                    .cloned()
                    .collect()
            }),
            AreaType::All => area
                .eq_ignore_ascii_case("all")
                .then(|| self.loadzone2id.keys().cloned().collect()),
        }
    }

    /// Restrict the table to the zones of the given interconnects.
    pub fn restricted_to(&self, interconnects: &BTreeSet<String>) -> GridResult<ZoneTable> {
        ZoneTable::new(
            self.division_kind,
            &self.all_alias,
            self.zones
                .values()
                .filter(|z| interconnects.contains(&z.interconnect))
                .cloned(),
        )
    }
}

/// Every non-empty union of interconnects, named by joining the sorted
/// members with `_`; the full union is named by `all_alias`.
fn interconnect_aliases(
    interconnects: Vec<String>,
    all_alias: &str,
) -> BTreeMap<String, BTreeSet<String>> {
    let n = interconnects.len();
    let mut aliases = BTreeMap::new();
    for mask in 1u32..(1u32 << n) {
        let members: BTreeSet<String> = interconnects
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, ic)| ic.clone())
            .collect();
        let name = if members.len() == n && n > 1 {
            all_alias.to_string()
        } else {
            members.iter().cloned().collect::<Vec<_>>().join("_")
        };
        aliases.insert(name, members);
    }
    aliases
}

const ET: &str = "ETC/GMT+5";
const CT: &str = "ETC/GMT+6";
const MT: &str = "ETC/GMT+7";
const PT: &str = "ETC/GMT+8";

/// Load zones of the `usa_tamu` model.
pub fn usa_tamu_zones() -> Vec<Zone> {
    let rows: &[(usize, &str, &str, &str, &str, &str)] = &[
        (1, "Maine", "Maine", "ME", "Eastern", ET),
        (2, "New Hampshire", "New Hampshire", "NH", "Eastern", ET),
        (3, "Vermont", "Vermont", "VT", "Eastern", ET),
        (4, "Massachusetts", "Massachusetts", "MA", "Eastern", ET),
        (5, "Rhode Island", "Rhode Island", "RI", "Eastern", ET),
        (6, "Connecticut", "Connecticut", "CT", "Eastern", ET),
        (7, "New York City", "New York", "NY", "Eastern", ET),
        (8, "Upstate New York", "New York", "NY", "Eastern", ET),
        (9, "New Jersey", "New Jersey", "NJ", "Eastern", ET),
        (10, "Pennsylvania Eastern", "Pennsylvania", "PA", "Eastern", ET),
        (11, "Pennsylvania Western", "Pennsylvania", "PA", "Eastern", ET),
        (12, "Delaware", "Delaware", "DE", "Eastern", ET),
        (13, "Maryland", "Maryland", "MD", "Eastern", ET),
        (14, "Virginia Mountains", "Virginia", "VA", "Eastern", ET),
        (15, "Virginia Tidewater", "Virginia", "VA", "Eastern", ET),
        (16, "North Carolina", "North Carolina", "NC", "Eastern", ET),
        (17, "Western North Carolina", "North Carolina", "NC", "Eastern", ET),
        (18, "South Carolina", "South Carolina", "SC", "Eastern", ET),
        (19, "Georgia North", "Georgia", "GA", "Eastern", ET),
        (20, "Georgia South", "Georgia", "GA", "Eastern", ET),
        (21, "Florida Panhandle", "Florida", "FL", "Eastern", CT),
        (22, "Florida North", "Florida", "FL", "Eastern", ET),
        (23, "Florida South", "Florida", "FL", "Eastern", ET),
        (24, "Alabama", "Alabama", "AL", "Eastern", CT),
        (25, "Mississippi", "Mississippi", "MS", "Eastern", CT),
        (26, "Tennessee", "Tennessee", "TN", "Eastern", CT),
        (27, "Kentucky", "Kentucky", "KY", "Eastern", ET),
        (28, "West Virginia", "West Virginia", "WV", "Eastern", ET),
        (29, "Ohio River", "Ohio", "OH", "Eastern", ET),
        (30, "Ohio Lake Erie", "Ohio", "OH", "Eastern", ET),
        (31, "Michigan Northern", "Michigan", "MI", "Eastern", ET),
        (32, "Michigan Southern", "Michigan", "MI", "Eastern", ET),
        (33, "Indiana", "Indiana", "IN", "Eastern", ET),
        (34, "Chicago North Illinois", "Illinois", "IL", "Eastern", CT),
        (35, "Illinois Downstate", "Illinois", "IL", "Eastern", CT),
        (36, "Wisconsin", "Wisconsin", "WI", "Eastern", CT),
        (37, "Minnesota Northern", "Minnesota", "MN", "Eastern", CT),
        (38, "Minnesota Southern", "Minnesota", "MN", "Eastern", CT),
        (39, "Iowa", "Iowa", "IA", "Eastern", CT),
        (40, "Missouri East", "Missouri", "MO", "Eastern", CT),
        (41, "Missouri West", "Missouri", "MO", "Eastern", CT),
        (42, "Arkansas", "Arkansas", "AR", "Eastern", CT),
        (43, "Louisiana", "Louisiana", "LA", "Eastern", CT),
        (44, "East Texas", "Texas", "TX", "Eastern", CT),
        (45, "Texas Panhandle", "Texas", "TX", "Eastern", CT),
        (46, "New Mexico Eastern", "New Mexico", "NM", "Eastern", MT),
        (47, "Oklahoma", "Oklahoma", "OK", "Eastern", CT),
        (48, "Kansas", "Kansas", "KS", "Eastern", CT),
        (49, "Nebraska", "Nebraska", "NE", "Eastern", CT),
        (50, "South Dakota", "South Dakota", "SD", "Eastern", CT),
        (51, "North Dakota", "North Dakota", "ND", "Eastern", CT),
        (52, "Montana Eastern", "Montana", "MT", "Eastern", MT),
        (201, "Washington", "Washington", "WA", "Western", PT),
        (202, "Oregon", "Oregon", "OR", "Western", PT),
        (203, "Northern California", "California", "CA", "Western", PT),
        (204, "Bay Area", "California", "CA", "Western", PT),
        (205, "Central California", "California", "CA", "Western", PT),
        (206, "Southwest California", "California", "CA", "Western", PT),
        (207, "Southeast California", "California", "CA", "Western", PT),
        (208, "Nevada", "Nevada", "NV", "Western", PT),
        (209, "Arizona", "Arizona", "AZ", "Western", MT),
        (210, "Utah", "Utah", "UT", "Western", MT),
        (211, "New Mexico Western", "New Mexico", "NM", "Western", MT),
        (212, "Colorado", "Colorado", "CO", "Western", MT),
        (213, "Wyoming", "Wyoming", "WY", "Western", MT),
        (214, "Idaho", "Idaho", "ID", "Western", MT),
        (215, "Montana Western", "Montana", "MT", "Western", MT),
        (216, "El Paso", "Texas", "TX", "Western", MT),
        (301, "Far West", "Texas", "TX", "Texas", CT),
        (302, "North", "Texas", "TX", "Texas", CT),
        (303, "West", "Texas", "TX", "Texas", CT),
        (304, "South", "Texas", "TX", "Texas", CT),
        (305, "North Central", "Texas", "TX", "Texas", CT),
        (306, "South Central", "Texas", "TX", "Texas", CT),
        (307, "Coast", "Texas", "TX", "Texas", CT),
        (308, "East", "Texas", "TX", "Texas", CT),
    ];
    rows.iter()
        .map(|(id, name, division, abv, interconnect, tz)| Zone {
            zone_id: ZoneId::new(*id),
            zone_name: name.to_string(),
            division: division.to_string(),
            interconnect: interconnect.to_string(),
            time_zone: tz.to_string(),
            abv: abv.to_string(),
        })
        .collect()
}
