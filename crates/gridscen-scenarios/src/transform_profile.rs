//! Profile transformer: base profiles reshaped to a transformed grid.
//!
//! Plant profiles gain columns for new renewable plants (the neighbor's
//! column scaled to the new capacity), follow the capacity scaling of the
//! change table and drop plants the grid no longer has. Demand follows the
//! `demand` factors and the electrification overlays.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use gridscen_core::{Grid, PlantId, ZoneId};
use gridscen_ts::{read_profile_csv, Profile, ProfileKind, DEMAND_INDEX, PLANT_INDEX};

use crate::change_table::ChangeTable;
use crate::electrification::electrified_demand;
use crate::scaling::{scaling_records, ScalingRecord};

/// Where profiles come from.
pub trait ProfileSource {
    /// A named profile at a given version, e.g. `("solar", "vJan2021")`.
    fn profile(&self, name: &str, version: &str) -> Result<Profile>;

    /// Canonical profile of one electrification technology.
    fn electrification_profile(&self, kind: &str, end_use: &str, tech: &str) -> Result<Profile>;

    fn base_profile(&self, kind: ProfileKind, version: &str) -> Result<Profile> {
        self.profile(kind.as_str(), version)
    }
}

/// Profiles stored as CSV files: `{name}_{version}.csv` and
/// `{kind}/{end_use}_{tech}.csv` under one directory.
#[derive(Debug, Clone)]
pub struct DirectoryProfileSource {
    root: PathBuf,
}

impl DirectoryProfileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(format!("{name}_{version}.csv"))
    }

    pub fn electrification_path(&self, kind: &str, end_use: &str, tech: &str) -> PathBuf {
        self.root.join(kind).join(format!("{end_use}_{tech}.csv"))
    }
}

impl ProfileSource for DirectoryProfileSource {
    fn profile(&self, name: &str, version: &str) -> Result<Profile> {
        let path = self.profile_path(name, version);
        if !path.exists() {
            return Err(anyhow!(
                "profile {name} version {version} not found at {}",
                path.display()
            ));
        }
        read_profile_csv(&path)
    }

    fn electrification_profile(&self, kind: &str, end_use: &str, tech: &str) -> Result<Profile> {
        let path = self.electrification_path(kind, end_use, tech);
        if !path.exists() {
            return Err(anyhow!(
                "{kind} profile {end_use}_{tech} not found at {}",
                path.display()
            ));
        }
        read_profile_csv(&path)
    }
}

/// Versions of the base profiles a scenario starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioInfo {
    pub base_demand: String,
    pub base_hydro: String,
    pub base_solar: String,
    pub base_wind: String,
}

impl Default for ScenarioInfo {
    fn default() -> Self {
        let version = "vJan2021".to_string();
        Self {
            base_demand: version.clone(),
            base_hydro: version.clone(),
            base_solar: version.clone(),
            base_wind: version,
        }
    }
}

impl ScenarioInfo {
    pub fn version(&self, kind: ProfileKind) -> &str {
        match kind {
            ProfileKind::Demand => &self.base_demand,
            ProfileKind::Hydro => &self.base_hydro,
            ProfileKind::Solar => &self.base_solar,
            ProfileKind::Wind => &self.base_wind,
        }
    }
}

pub struct ProfileTransformer<'a> {
    info: &'a ScenarioInfo,
    grid: &'a Grid,
    ct: &'a ChangeTable<'a>,
    source: &'a dyn ProfileSource,
    records: Vec<ScalingRecord>,
}

impl<'a> ProfileTransformer<'a> {
    /// `grid` is the output of the grid transformer for `ct`.
    pub fn new(
        info: &'a ScenarioInfo,
        grid: &'a Grid,
        ct: &'a ChangeTable<'a>,
        source: &'a dyn ProfileSource,
    ) -> Result<Self> {
        let records = scaling_records(ct.changes())?;
        Ok(Self {
            info,
            grid,
            ct,
            source,
            records,
        })
    }

    pub fn get_profile(&self, kind: ProfileKind) -> Result<Profile> {
        let version = self.info.version(kind);
        let base = self
            .source
            .base_profile(kind, version)
            .with_context(|| format!("loading base {kind} profile {version}"))?;
        base.check_hourly()
            .with_context(|| format!("base {kind} profile {version}"))?;
        let profile = match kind {
            ProfileKind::Demand => self.transform_demand(base)?,
            _ => self.transform_plant_profile(kind, base)?,
        };
        info!(
            %kind,
            version,
            hours = profile.len(),
            columns = profile.width(),
            "profile transformed"
        );
        Ok(profile)
    }

    /// Every profile kind, in [`ProfileKind::ALL`] order.
    pub fn get_all(&self) -> Result<Vec<(ProfileKind, Profile)>> {
        ProfileKind::ALL
            .iter()
            .map(|kind| Ok((*kind, self.get_profile(*kind)?)))
            .collect()
    }

    fn transform_demand(&self, mut profile: Profile) -> Result<Profile> {
        profile.set_index_name(DEMAND_INDEX);
        profile.retain_columns(|id| self.grid.id2zone.contains_key(&ZoneId::new(id)));
        let loaded: BTreeSet<ZoneId> = self.grid.bus.values().map(|b| b.zone_id).collect();
        if let Some(zone_id) = loaded.iter().find(|z| !profile.contains(z.value())) {
            return Err(anyhow!("demand profile has no column for zone {zone_id}"));
        }
        let columns: BTreeSet<usize> = profile.column_ids().collect();

        let mut factors: BTreeMap<usize, f64> = BTreeMap::new();
        for record in &self.records {
            if record.key() == "demand" && record.scope() == Some("zone_id") {
                if let Some(zone_id) = record.id::<ZoneId>() {
                    *factors.entry(zone_id.value()).or_insert(1.0) *= record.value;
                }
            }
        }
        profile.scale_columns(&factors)?;

        for (kind, spec) in &self.ct.changes().electrification {
            if let Some(extra) = electrified_demand(kind, spec, self.grid, self.source)? {
                profile
                    .add_assign(&extra)
                    .with_context(|| format!("adding {kind} electrification to demand"))?;
                debug!(kind = %kind, "electrified demand added");
            }
        }
        profile.retain_columns(|id| columns.contains(&id));
        Ok(profile)
    }

    fn transform_plant_profile(&self, kind: ProfileKind, mut profile: Profile) -> Result<Profile> {
        profile.set_index_name(PLANT_INDEX);
        let base_grid = self.ct.grid();
        let resources = base_grid.resources().resources_for_profile(kind.as_str());
        let next = self.ct.next_ids();

        for (offset, plant) in self.ct.changes().new_plant.iter().enumerate() {
            if !resources.contains(&plant.kind) {
                continue;
            }
            let id = next.plant_at(offset);
            let neighbor = plant
                .plant_id_neighbor
                .ok_or_else(|| anyhow!("new {} plant {id} has no profile neighbor", plant.kind))?;
            let neighbor_pmax = base_grid
                .plant
                .get(&neighbor)
                .map(|p| p.pmax)
                .ok_or_else(|| anyhow!("neighbor plant {neighbor} is not in the base grid"))?;
            let column = profile
                .column(neighbor.value())
                .ok_or_else(|| anyhow!("{kind} profile has no column for plant {neighbor}"))?;
            let ratio = if neighbor_pmax > 0.0 {
                plant.pmax / neighbor_pmax
            } else {
                0.0
            };
            let values = column.iter().map(|v| v * ratio).collect();
            profile.insert_column(id.value(), values)?;
            debug!(plant = %id, %neighbor, ratio, "new plant profile");
        }

        let mut factors: BTreeMap<usize, f64> = BTreeMap::new();
        for record in &self.records {
            if !resources.contains(record.key()) {
                continue;
            }
            match record.scope() {
                Some("zone_id") => {
                    let zone_id = match record.id::<ZoneId>() {
                        Some(zone_id) => zone_id,
                        None => continue,
                    };
                    let members = base_grid
                        .plants_of_type(record.key())
                        .filter(|(_, p)| p.zone_id == zone_id)
                        .map(|(id, _)| id);
                    for id in members {
                        *factors.entry(id.value()).or_insert(1.0) *= record.value;
                    }
                }
                Some("plant_id") => {
                    if let Some(id) = record.id::<PlantId>() {
                        *factors.entry(id.value()).or_insert(1.0) *= record.value;
                    }
                }
                _ => {}
            }
        }
        profile.scale_columns(&factors)?;

        let keep: BTreeSet<usize> = self
            .grid
            .plant
            .iter()
            .filter(|(_, p)| resources.contains(&p.kind))
            .map(|(id, _)| id.value())
            .collect();
        if let Some(missing) = keep.iter().find(|id| !profile.contains(**id)) {
            return Err(anyhow!("{kind} profile has no column for plant {missing}"));
        }
        profile.retain_columns(|id| keep.contains(&id));
        Ok(profile)
    }
}
