//! The change table: validated, declarative modifications of a grid.
//!
//! [`ChangeSet`] is the plain data, laid out like the dictionary documents
//! users write:
//!
//! ```yaml
//! solar:
//!   zone_id: {301: 1.41}
//! coal_cost:
//!   plant_id: {1: 0.9}
//! dcline:
//!   dcline_id: {7: 0}
//! new_bus:
//!   - {lat: 36.0155, lon: -114.738, zone_id: 208, Pd: 0, baseKV: 345}
//! remove_branch: [5]
//! ```
//!
//! [`ChangeTable`] pairs a change set with the grid it modifies. Every
//! mutator validates its whole argument against that grid before touching
//! the set, so a rejected call leaves the table unchanged.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

use gridscen_core::geo::{haversine, nearest};
use gridscen_core::{
    next_id, BranchId, BusId, DcLineId, Grid, GridError, GridResult, PlantId, ResourceTaxonomy,
    ZoneId,
};

use crate::config::load_document;
use crate::electrification::{is_electrification_kind, ElectrificationSpec};
use crate::flexibility::DemandFlexibilitySpec;

pub const COST_SUFFIX: &str = "_cost";
pub const PMIN_SUFFIX: &str = "_pmin";

/// Factors keyed by zone and by plant for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantScaling {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_id: BTreeMap<ZoneId, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plant_id: BTreeMap<PlantId, f64>,
}

impl PlantScaling {
    pub fn is_empty(&self) -> bool {
        self.zone_id.is_empty() && self.plant_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchScaling {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_id: BTreeMap<ZoneId, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_id: BTreeMap<BranchId, f64>,
}

impl BranchScaling {
    pub fn is_empty(&self) -> bool {
        self.zone_id.is_empty() && self.branch_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DcLineScaling {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dcline_id: BTreeMap<DcLineId, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandScaling {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_id: BTreeMap<ZoneId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewBus {
    pub lat: f64,
    pub lon: f64,
    pub zone_id: ZoneId,
    #[serde(rename = "Pd", default)]
    pub pd: f64,
    #[serde(rename = "baseKV")]
    pub base_kv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewBranch {
    pub from_bus_id: BusId,
    pub to_bus_id: BusId,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
}

/// A new DC line. Documents give either `Pmin`/`Pmax` or a symmetric
/// `capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NewDcLineRecord")]
pub struct NewDcLine {
    pub from_bus_id: BusId,
    pub to_bus_id: BusId,
    #[serde(rename = "Pmin")]
    pub pmin: f64,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
}

impl NewDcLine {
    pub fn with_capacity(from_bus_id: BusId, to_bus_id: BusId, capacity: f64) -> Self {
        Self {
            from_bus_id,
            to_bus_id,
            pmin: -capacity,
            pmax: capacity,
        }
    }

    pub fn with_range(from_bus_id: BusId, to_bus_id: BusId, pmin: f64, pmax: f64) -> Self {
        Self {
            from_bus_id,
            to_bus_id,
            pmin,
            pmax,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NewDcLineRecord {
    from_bus_id: BusId,
    to_bus_id: BusId,
    #[serde(rename = "Pmin")]
    pmin: Option<f64>,
    #[serde(rename = "Pmax")]
    pmax: Option<f64>,
    capacity: Option<f64>,
}

impl TryFrom<NewDcLineRecord> for NewDcLine {
    type Error = String;

    fn try_from(r: NewDcLineRecord) -> Result<Self, Self::Error> {
        match (r.capacity, r.pmin, r.pmax) {
            (Some(capacity), None, None) => {
                if capacity < 0.0 {
                    return Err(format!("dcline capacity must be non-negative, got {capacity}"));
                }
                Ok(NewDcLine::with_capacity(r.from_bus_id, r.to_bus_id, capacity))
            }
            (None, Some(pmin), Some(pmax)) => {
                Ok(NewDcLine::with_range(r.from_bus_id, r.to_bus_id, pmin, pmax))
            }
            _ => Err("new dcline needs either 'capacity' or both 'Pmin' and 'Pmax'".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewPlant {
    #[serde(rename = "type")]
    pub kind: String,
    pub bus_id: BusId,
    #[serde(rename = "Pmin", default)]
    pub pmin: f64,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
    #[serde(default)]
    pub c0: f64,
    #[serde(default)]
    pub c1: f64,
    #[serde(default)]
    pub c2: f64,
    /// Existing plant whose profile the new plant reuses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_id_neighbor: Option<PlantId>,
}

impl NewPlant {
    pub fn new(kind: &str, bus_id: BusId, pmax: f64) -> Self {
        Self {
            kind: kind.to_string(),
            bus_id,
            pmin: 0.0,
            pmax,
            c0: 0.0,
            c1: 0.0,
            c2: 0.0,
            plant_id_neighbor: None,
        }
    }
}

/// A new storage unit; omitted parameters take the grid model's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewStorage {
    pub bus_id: BusId,
    pub capacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_stor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_max: Option<f64>,
    #[serde(rename = "InEff", default, skip_serializing_if = "Option::is_none")]
    pub in_eff: Option<f64>,
    #[serde(rename = "OutEff", default, skip_serializing_if = "Option::is_none")]
    pub out_eff: Option<f64>,
    #[serde(rename = "LossFactor", default, skip_serializing_if = "Option::is_none")]
    pub loss_factor: Option<f64>,
}

impl NewStorage {
    pub fn new(bus_id: BusId, capacity: f64) -> Self {
        Self {
            bus_id,
            capacity,
            ..Default::default()
        }
    }

    /// Parameters of this unit with omitted values taken from `defaults`.
    pub fn resolve(&self, defaults: &gridscen_core::StorageDefaults) -> gridscen_core::StorageDefaults {
        gridscen_core::StorageDefaults {
            duration: self.duration.unwrap_or(defaults.duration),
            min_stor: self.min_stor.unwrap_or(defaults.min_stor),
            max_stor: self.max_stor.unwrap_or(defaults.max_stor),
            in_eff: self.in_eff.unwrap_or(defaults.in_eff),
            out_eff: self.out_eff.unwrap_or(defaults.out_eff),
            energy_value: self.energy_value.unwrap_or(defaults.energy_value),
            loss_factor: self.loss_factor.unwrap_or(defaults.loss_factor),
            terminal_min: self.terminal_min.unwrap_or(defaults.terminal_min),
            terminal_max: self.terminal_max.unwrap_or(defaults.terminal_max),
        }
    }
}

/// Every modification a scenario declares.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// `<resource>`: Pmax and Pmin
    pub plant_scaling: BTreeMap<String, PlantScaling>,
    /// `<resource>_cost`
    pub cost_scaling: BTreeMap<String, PlantScaling>,
    /// `<resource>_pmin`
    pub pmin_scaling: BTreeMap<String, PlantScaling>,
    pub branch: BranchScaling,
    pub dcline: DcLineScaling,
    pub demand: DemandScaling,
    pub new_bus: Vec<NewBus>,
    pub new_branch: Vec<NewBranch>,
    pub new_dcline: Vec<NewDcLine>,
    pub new_plant: Vec<NewPlant>,
    pub storage: Vec<NewStorage>,
    pub remove_branch: BTreeSet<BranchId>,
    pub remove_bus: BTreeSet<BusId>,
    pub remove_dcline: BTreeSet<DcLineId>,
    pub remove_plant: BTreeSet<PlantId>,
    /// Keyed by electrification class (`building`, `transportation`)
    pub electrification: BTreeMap<String, ElectrificationSpec>,
    pub demand_flexibility: Option<DemandFlexibilitySpec>,
}

fn parse_entry<T: DeserializeOwned>(key: &str, value: &Value) -> GridResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| GridError::Parse(format!("change table key '{key}': {e}")))
}

fn insert_entry<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: &T) -> GridResult<()> {
    let value = serde_json::to_value(value)
        .map_err(|e| GridError::Other(format!("serializing change table key '{key}': {e}")))?;
    map.insert(key.to_string(), value);
    Ok(())
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        *self == ChangeSet::default()
    }

    /// Parse the dictionary layout. Keys other than the recognized ones,
    /// the resources of `resources` and their `_cost`/`_pmin` variants fail.
    pub fn from_value(value: &Value, resources: &ResourceTaxonomy) -> GridResult<ChangeSet> {
        let object = value
            .as_object()
            .ok_or_else(|| GridError::invalid("a change table must be a mapping"))?;
        let mut set = ChangeSet::default();
        for (key, entry) in object {
            match key.as_str() {
                "branch" => set.branch = parse_entry(key, entry)?,
                "dcline" => set.dcline = parse_entry(key, entry)?,
                "demand" => set.demand = parse_entry(key, entry)?,
                "new_bus" => set.new_bus = parse_entry(key, entry)?,
                "new_branch" => set.new_branch = parse_entry(key, entry)?,
                "new_dcline" => set.new_dcline = parse_entry(key, entry)?,
                "new_plant" => set.new_plant = parse_entry(key, entry)?,
                "storage" => set.storage = parse_entry(key, entry)?,
                "remove_branch" => set.remove_branch = parse_entry(key, entry)?,
                "remove_bus" => set.remove_bus = parse_entry(key, entry)?,
                "remove_dcline" => set.remove_dcline = parse_entry(key, entry)?,
                "remove_plant" => set.remove_plant = parse_entry(key, entry)?,
                "demand_flexibility" => set.demand_flexibility = Some(parse_entry(key, entry)?),
                k if is_electrification_kind(k) => {
                    set.electrification
                        .insert(k.to_string(), parse_entry(key, entry)?);
                }
                k if resources.contains(k) => {
                    set.plant_scaling.insert(k.to_string(), parse_entry(key, entry)?);
                }
                k => match resource_key(k, resources) {
                    Some((resource, ScalingTarget::Cost)) => {
                        set.cost_scaling
                            .insert(resource.to_string(), parse_entry(key, entry)?);
                    }
                    Some((resource, ScalingTarget::Pmin)) => {
                        set.pmin_scaling
                            .insert(resource.to_string(), parse_entry(key, entry)?);
                    }
                    _ => {
                        return Err(GridError::invalid(format!(
                            "unknown change table key '{k}'"
                        )))
                    }
                },
            }
        }
        Ok(set)
    }

    /// The dictionary layout; empty keys are omitted.
    pub fn to_value(&self) -> GridResult<Value> {
        let mut map = Map::new();
        for (resource, scaling) in &self.plant_scaling {
            insert_entry(&mut map, resource, scaling)?;
        }
        for (resource, scaling) in &self.cost_scaling {
            insert_entry(&mut map, &format!("{resource}{COST_SUFFIX}"), scaling)?;
        }
        for (resource, scaling) in &self.pmin_scaling {
            insert_entry(&mut map, &format!("{resource}{PMIN_SUFFIX}"), scaling)?;
        }
        if !self.branch.is_empty() {
            insert_entry(&mut map, "branch", &self.branch)?;
        }
        if !self.dcline.dcline_id.is_empty() {
            insert_entry(&mut map, "dcline", &self.dcline)?;
        }
        if !self.demand.zone_id.is_empty() {
            insert_entry(&mut map, "demand", &self.demand)?;
        }
        if !self.new_bus.is_empty() {
            insert_entry(&mut map, "new_bus", &self.new_bus)?;
        }
        if !self.new_branch.is_empty() {
            insert_entry(&mut map, "new_branch", &self.new_branch)?;
        }
        if !self.new_dcline.is_empty() {
            insert_entry(&mut map, "new_dcline", &self.new_dcline)?;
        }
        if !self.new_plant.is_empty() {
            insert_entry(&mut map, "new_plant", &self.new_plant)?;
        }
        if !self.storage.is_empty() {
            insert_entry(&mut map, "storage", &self.storage)?;
        }
        if !self.remove_branch.is_empty() {
            insert_entry(&mut map, "remove_branch", &self.remove_branch)?;
        }
        if !self.remove_bus.is_empty() {
            insert_entry(&mut map, "remove_bus", &self.remove_bus)?;
        }
        if !self.remove_dcline.is_empty() {
            insert_entry(&mut map, "remove_dcline", &self.remove_dcline)?;
        }
        if !self.remove_plant.is_empty() {
            insert_entry(&mut map, "remove_plant", &self.remove_plant)?;
        }
        for (kind, spec) in &self.electrification {
            insert_entry(&mut map, kind, spec)?;
        }
        if let Some(flex) = &self.demand_flexibility {
            insert_entry(&mut map, "demand_flexibility", flex)?;
        }
        Ok(Value::Object(map))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalingTarget {
    Capacity,
    Cost,
    Pmin,
}

/// Split `ng_cost` into `(ng, Cost)`; `None` unless the prefix is a resource.
fn resource_key<'a>(key: &'a str, resources: &ResourceTaxonomy) -> Option<(&'a str, ScalingTarget)> {
    if let Some(resource) = key.strip_suffix(COST_SUFFIX) {
        return resources
            .contains(resource)
            .then_some((resource, ScalingTarget::Cost));
    }
    if let Some(resource) = key.strip_suffix(PMIN_SUFFIX) {
        return resources
            .contains(resource)
            .then_some((resource, ScalingTarget::Pmin));
    }
    resources
        .contains(key)
        .then_some((key, ScalingTarget::Capacity))
}

/// First ids handed to elements added by a change set, as the grid
/// transformer will allocate them: one past the largest existing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextIds {
    pub bus: BusId,
    pub branch: BranchId,
    pub dcline: DcLineId,
    pub plant: PlantId,
}

impl NextIds {
    pub fn of(grid: &Grid) -> Self {
        Self {
            bus: next_id(&grid.bus, BusId::new(1)),
            branch: next_id(&grid.branch, BranchId::new(0)),
            dcline: next_id(&grid.dcline, DcLineId::new(0)),
            plant: next_id(&grid.plant, PlantId::new(0)),
        }
    }

    pub fn bus_at(&self, offset: usize) -> BusId {
        BusId::new(self.bus.value() + offset)
    }

    pub fn branch_at(&self, offset: usize) -> BranchId {
        BranchId::new(self.branch.value() + offset)
    }

    pub fn dcline_at(&self, offset: usize) -> DcLineId {
        DcLineId::new(self.dcline.value() + offset)
    }

    pub fn plant_at(&self, offset: usize) -> PlantId {
        PlantId::new(self.plant.value() + offset)
    }
}

/// Location and voltage of an existing or declared bus.
#[derive(Debug, Clone, PartialEq)]
struct BusSite {
    interconnect: String,
    lat: f64,
    lon: f64,
    base_kv: f64,
}

fn check_factor(factor: f64) -> GridResult<()> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(GridError::invalid(format!(
            "scaling factor must be a non-negative number, got {factor}"
        )));
    }
    Ok(())
}

fn check_fraction(name: &str, value: Option<f64>) -> GridResult<()> {
    match value {
        Some(v) if !v.is_finite() || !(0.0..=1.0).contains(&v) => Err(GridError::invalid(
            format!("{name} must be within [0, 1], got {v}"),
        )),
        _ => Ok(()),
    }
}

/// A change set bound to the grid it modifies.
#[derive(Debug, Clone)]
pub struct ChangeTable<'g> {
    grid: &'g Grid,
    changes: ChangeSet,
}

impl<'g> ChangeTable<'g> {
    pub fn new(grid: &'g Grid) -> Self {
        Self {
            grid,
            changes: ChangeSet::default(),
        }
    }

    /// Replay `set` through the validating mutators.
    pub fn from_change_set(grid: &'g Grid, set: ChangeSet) -> GridResult<Self> {
        let mut table = ChangeTable::new(grid);
        table.add_bus(&set.new_bus)?;
        table.add_branch(&set.new_branch)?;
        table.add_dcline(&set.new_dcline)?;
        table.add_plant(&set.new_plant)?;
        table.add_storage_capacity(&set.storage)?;

        for (target, scalings) in [
            (ScalingTarget::Capacity, &set.plant_scaling),
            (ScalingTarget::Cost, &set.cost_scaling),
            (ScalingTarget::Pmin, &set.pmin_scaling),
        ] {
            for (resource, scaling) in scalings {
                let zones = zone_args(&scaling.zone_id);
                let zones: Vec<(&str, f64)> = zones.iter().map(|(z, f)| (z.as_str(), *f)).collect();
                let plants: Vec<(PlantId, f64)> =
                    scaling.plant_id.iter().map(|(id, f)| (*id, *f)).collect();
                table.scale_plants(target, resource, &zones, &plants)?;
            }
        }

        let zones = zone_args(&set.branch.zone_id);
        let zones: Vec<(&str, f64)> = zones.iter().map(|(z, f)| (z.as_str(), *f)).collect();
        let branches: Vec<(BranchId, f64)> =
            set.branch.branch_id.iter().map(|(id, f)| (*id, *f)).collect();
        if !zones.is_empty() || !branches.is_empty() {
            table.scale_branch_capacity(&zones, &branches)?;
        }
        let dclines: Vec<(DcLineId, f64)> =
            set.dcline.dcline_id.iter().map(|(id, f)| (*id, *f)).collect();
        table.scale_dcline_capacity(&dclines)?;
        let zones = zone_args(&set.demand.zone_id);
        let zones: Vec<(&str, f64)> = zones.iter().map(|(z, f)| (z.as_str(), *f)).collect();
        table.scale_demand(&zones)?;

        table.remove_branch(&set.remove_branch.iter().copied().collect::<Vec<_>>())?;
        table.remove_dcline(&set.remove_dcline.iter().copied().collect::<Vec<_>>())?;
        table.remove_plant(&set.remove_plant.iter().copied().collect::<Vec<_>>())?;
        table.remove_bus(&set.remove_bus.iter().copied().collect::<Vec<_>>())?;

        for (kind, spec) in set.electrification {
            table.add_electrification(&kind, spec)?;
        }
        if let Some(flex) = set.demand_flexibility {
            table.add_demand_flexibility(flex)?;
        }
        Ok(table)
    }

    /// Parse and replay a change-table document.
    pub fn from_value(grid: &'g Grid, value: &Value) -> GridResult<Self> {
        let set = ChangeSet::from_value(value, grid.resources())?;
        Self::from_change_set(grid, set)
    }

    /// Load a YAML or JSON change-table document.
    pub fn from_path(grid: &'g Grid, path: &Path) -> anyhow::Result<Self> {
        let value = load_document(path)?;
        let table = Self::from_value(grid, &value)?;
        info!(path = %path.display(), "loaded change table");
        Ok(table)
    }

    pub fn grid(&self) -> &'g Grid {
        self.grid
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }

    pub fn next_ids(&self) -> NextIds {
        NextIds::of(self.grid)
    }

    pub fn clear(&mut self) {
        self.changes = ChangeSet::default();
    }

    /// Drop one top-level key, e.g. `solar`, `ng_cost`, `new_bus`.
    pub fn clear_key(&mut self, key: &str) -> GridResult<()> {
        let c = &mut self.changes;
        match key {
            "branch" => c.branch = BranchScaling::default(),
            "dcline" => c.dcline = DcLineScaling::default(),
            "demand" => c.demand = DemandScaling::default(),
            "new_bus" => c.new_bus.clear(),
            "new_branch" => c.new_branch.clear(),
            "new_dcline" => c.new_dcline.clear(),
            "new_plant" => c.new_plant.clear(),
            "storage" => c.storage.clear(),
            "remove_branch" => c.remove_branch.clear(),
            "remove_bus" => c.remove_bus.clear(),
            "remove_dcline" => c.remove_dcline.clear(),
            "remove_plant" => c.remove_plant.clear(),
            "demand_flexibility" => c.demand_flexibility = None,
            k if is_electrification_kind(k) => {
                c.electrification.remove(k);
            }
            k => match resource_key(k, self.grid.resources()) {
                Some((resource, ScalingTarget::Capacity)) => {
                    c.plant_scaling.remove(resource);
                }
                Some((resource, ScalingTarget::Cost)) => {
                    c.cost_scaling.remove(resource);
                }
                Some((resource, ScalingTarget::Pmin)) => {
                    c.pmin_scaling.remove(resource);
                }
                None => return Err(GridError::invalid(format!("unknown change table key '{k}'"))),
            },
        }
        Ok(())
    }

    fn check_resource(&self, resource: &str) -> GridResult<()> {
        if !self.grid.resources().contains(resource) {
            return Err(GridError::invalid(format!(
                "'{resource}' is not a resource of the {} model",
                self.grid.grid_model
            )));
        }
        Ok(())
    }

    fn zone_factors(&self, zones: &[(&str, f64)]) -> GridResult<BTreeMap<ZoneId, f64>> {
        let mut out = BTreeMap::new();
        for (zone, factor) in zones {
            check_factor(*factor)?;
            out.insert(self.grid.resolve_zone(zone)?, *factor);
        }
        Ok(out)
    }

    /// Type of an existing plant or of one declared in `new_plant`.
    fn plant_type(&self, id: PlantId) -> Option<&str> {
        if let Some(plant) = self.grid.plant.get(&id) {
            return Some(plant.kind.as_str());
        }
        let offset = id.value().checked_sub(self.next_ids().plant.value())?;
        self.changes.new_plant.get(offset).map(|p| p.kind.as_str())
    }

    fn bus_site(&self, id: BusId) -> Option<BusSite> {
        if let Some(bus) = self.grid.bus.get(&id) {
            return Some(BusSite {
                interconnect: bus.interconnect.clone(),
                lat: bus.lat,
                lon: bus.lon,
                base_kv: bus.base_kv,
            });
        }
        let offset = id.value().checked_sub(self.next_ids().bus.value())?;
        let bus = self.changes.new_bus.get(offset)?;
        Some(BusSite {
            interconnect: self.grid.zone_table().interconnect_of(bus.zone_id)?.to_string(),
            lat: bus.lat,
            lon: bus.lon,
            base_kv: bus.base_kv,
        })
    }

    fn branch_exists(&self, id: BranchId) -> bool {
        self.grid.branch.contains_key(&id)
            || (self.next_ids().branch.value()..self.next_ids().branch.value() + self.changes.new_branch.len())
                .contains(&id.value())
    }

    fn dcline_exists(&self, id: DcLineId) -> bool {
        self.grid.dcline.contains_key(&id)
            || (self.next_ids().dcline.value()..self.next_ids().dcline.value() + self.changes.new_dcline.len())
                .contains(&id.value())
    }

    fn scale_plants(
        &mut self,
        target: ScalingTarget,
        resource: &str,
        zones: &[(&str, f64)],
        plants: &[(PlantId, f64)],
    ) -> GridResult<()> {
        self.check_resource(resource)?;
        let zone_factors = self.zone_factors(zones)?;
        let mut plant_factors = BTreeMap::new();
        for (id, factor) in plants {
            check_factor(*factor)?;
            match self.plant_type(*id) {
                None => return Err(GridError::unknown("plant", id)),
                Some(kind) if kind != resource => {
                    return Err(GridError::invalid(format!(
                        "plant {id} is of type {kind}, not {resource}"
                    )))
                }
                Some(_) => {}
            }
            plant_factors.insert(*id, *factor);
        }

        let table = match target {
            ScalingTarget::Capacity => &mut self.changes.plant_scaling,
            ScalingTarget::Cost => &mut self.changes.cost_scaling,
            ScalingTarget::Pmin => &mut self.changes.pmin_scaling,
        };
        let entry = table.entry(resource.to_string()).or_default();
        entry.zone_id.extend(zone_factors);
        entry.plant_id.extend(plant_factors);
        if entry.is_empty() {
            table.remove(resource);
        }
        debug!(resource, ?target, "plant scaling recorded");
        Ok(())
    }

    /// Scale Pmax and Pmin of `resource` plants by zone (name or id) and by
    /// plant id. Thermal cost curves follow the capacity.
    pub fn scale_plant_capacity(
        &mut self,
        resource: &str,
        zones: &[(&str, f64)],
        plants: &[(PlantId, f64)],
    ) -> GridResult<()> {
        self.scale_plants(ScalingTarget::Capacity, resource, zones, plants)
    }

    /// Scale every cost coefficient of `resource` plants.
    pub fn scale_plant_cost(
        &mut self,
        resource: &str,
        zones: &[(&str, f64)],
        plants: &[(PlantId, f64)],
    ) -> GridResult<()> {
        self.scale_plants(ScalingTarget::Cost, resource, zones, plants)
    }

    /// Scale Pmin of `resource` plants; the result never exceeds Pmax.
    pub fn scale_plant_pmin(
        &mut self,
        resource: &str,
        zones: &[(&str, f64)],
        plants: &[(PlantId, f64)],
    ) -> GridResult<()> {
        self.scale_plants(ScalingTarget::Pmin, resource, zones, plants)
    }

    /// Scale rateA (and inversely x) of branches inside a zone or by id.
    pub fn scale_branch_capacity(
        &mut self,
        zones: &[(&str, f64)],
        branches: &[(BranchId, f64)],
    ) -> GridResult<()> {
        let zone_factors = self.zone_factors(zones)?;
        for (id, factor) in branches {
            check_factor(*factor)?;
            if !self.branch_exists(*id) {
                return Err(GridError::unknown("branch", id));
            }
        }
        self.changes.branch.zone_id.extend(zone_factors);
        self.changes
            .branch
            .branch_id
            .extend(branches.iter().copied());
        Ok(())
    }

    /// Scale Pmin and Pmax of DC lines; factor 0 also takes the line out of
    /// service.
    pub fn scale_dcline_capacity(&mut self, dclines: &[(DcLineId, f64)]) -> GridResult<()> {
        for (id, factor) in dclines {
            check_factor(*factor)?;
            if !self.dcline_exists(*id) {
                return Err(GridError::unknown("dcline", id));
            }
        }
        self.changes
            .dcline
            .dcline_id
            .extend(dclines.iter().copied());
        Ok(())
    }

    /// Scale the zonal demand profile.
    pub fn scale_demand(&mut self, zones: &[(&str, f64)]) -> GridResult<()> {
        let zone_factors = self.zone_factors(zones)?;
        self.changes.demand.zone_id.extend(zone_factors);
        Ok(())
    }

    pub fn add_bus(&mut self, buses: &[NewBus]) -> GridResult<()> {
        for bus in buses {
            if !self.grid.id2zone.contains_key(&bus.zone_id) {
                return Err(GridError::unknown("zone", bus.zone_id));
            }
            if !(-90.0..=90.0).contains(&bus.lat) || !(-180.0..=180.0).contains(&bus.lon) {
                return Err(GridError::invalid(format!(
                    "bus coordinates ({}, {}) are out of range",
                    bus.lat, bus.lon
                )));
            }
            if !bus.base_kv.is_finite() || bus.base_kv <= 0.0 {
                return Err(GridError::invalid(format!(
                    "baseKV must be positive, got {}",
                    bus.base_kv
                )));
            }
            if !bus.pd.is_finite() {
                return Err(GridError::invalid("Pd must be a finite number"));
            }
        }
        self.changes.new_bus.extend(buses.iter().cloned());
        Ok(())
    }

    pub fn add_branch(&mut self, branches: &[NewBranch]) -> GridResult<()> {
        for branch in branches {
            let from = self
                .bus_site(branch.from_bus_id)
                .ok_or_else(|| GridError::unknown("bus", branch.from_bus_id))?;
            let to = self
                .bus_site(branch.to_bus_id)
                .ok_or_else(|| GridError::unknown("bus", branch.to_bus_id))?;
            if branch.from_bus_id == branch.to_bus_id {
                return Err(GridError::invalid(format!(
                    "branch endpoints must differ, got bus {} twice",
                    branch.from_bus_id
                )));
            }
            if from.interconnect != to.interconnect {
                return Err(GridError::invalid(format!(
                    "buses {} ({}) and {} ({}) are in different interconnects",
                    branch.from_bus_id, from.interconnect, branch.to_bus_id, to.interconnect
                )));
            }
            if haversine((from.lat, from.lon), (to.lat, to.lon)) == 0.0 {
                return Err(GridError::invalid(format!(
                    "buses {} and {} are at the same location",
                    branch.from_bus_id, branch.to_bus_id
                )));
            }
            if from.base_kv != to.base_kv {
                return Err(GridError::invalid(format!(
                    "new lines need endpoints at one voltage, got {} kV and {} kV",
                    from.base_kv, to.base_kv
                )));
            }
            if !branch.pmax.is_finite() || branch.pmax < 0.0 {
                return Err(GridError::invalid(format!(
                    "branch Pmax must be non-negative, got {}",
                    branch.pmax
                )));
            }
        }
        self.changes.new_branch.extend(branches.iter().cloned());
        Ok(())
    }

    pub fn add_dcline(&mut self, dclines: &[NewDcLine]) -> GridResult<()> {
        for line in dclines {
            for bus_id in [line.from_bus_id, line.to_bus_id] {
                if self.bus_site(bus_id).is_none() {
                    return Err(GridError::unknown("bus", bus_id));
                }
            }
            if line.from_bus_id == line.to_bus_id {
                return Err(GridError::invalid("dcline endpoints must differ"));
            }
            if !line.pmin.is_finite() || !line.pmax.is_finite() || line.pmin > line.pmax {
                return Err(GridError::invalid(format!(
                    "dcline needs Pmin <= Pmax, got {} and {}",
                    line.pmin, line.pmax
                )));
            }
        }
        self.changes.new_dcline.extend(dclines.iter().cloned());
        Ok(())
    }

    /// Add plants. Profile-tracked plants without `plant_id_neighbor` get
    /// the nearest existing plant of their type.
    pub fn add_plant(&mut self, plants: &[NewPlant]) -> GridResult<()> {
        let resources = self.grid.resources();
        let mut accepted = Vec::with_capacity(plants.len());
        for plant in plants {
            self.check_resource(&plant.kind)?;
            let site = self
                .bus_site(plant.bus_id)
                .ok_or_else(|| GridError::unknown("bus", plant.bus_id))?;
            if !plant.pmax.is_finite() || plant.pmax < 0.0 {
                return Err(GridError::invalid(format!(
                    "Pmax must be non-negative, got {}",
                    plant.pmax
                )));
            }
            if !plant.pmin.is_finite() || plant.pmin < 0.0 || plant.pmin > plant.pmax {
                return Err(GridError::invalid(format!(
                    "Pmin must lie within [0, Pmax], got {}",
                    plant.pmin
                )));
            }
            if resources.is_thermal(&plant.kind) {
                for (name, c) in [("c0", plant.c0), ("c1", plant.c1), ("c2", plant.c2)] {
                    if !c.is_finite() || c < 0.0 {
                        return Err(GridError::invalid(format!(
                            "{name} of a {} plant must be non-negative, got {c}",
                            plant.kind
                        )));
                    }
                }
            }

            let mut plant = plant.clone();
            if resources.is_profile_resource(&plant.kind) {
                match plant.plant_id_neighbor {
                    Some(neighbor) => match self.grid.plant.get(&neighbor) {
                        Some(p) if p.kind == plant.kind => {}
                        Some(p) => {
                            return Err(GridError::invalid(format!(
                                "neighbor {neighbor} is of type {}, not {}",
                                p.kind, plant.kind
                            )))
                        }
                        None => return Err(GridError::unknown("plant", neighbor)),
                    },
                    None => {
                        let neighbor = nearest(
                            (site.lat, site.lon),
                            self.grid
                                .plants_of_type(&plant.kind)
                                .map(|(id, p)| (id, p.lat, p.lon)),
                        )
                        .ok_or_else(|| {
                            GridError::invalid(format!(
                                "no existing {} plant to borrow a profile from",
                                plant.kind
                            ))
                        })?;
                        debug!(kind = %plant.kind, %neighbor, "attached profile neighbor");
                        plant.plant_id_neighbor = Some(neighbor);
                    }
                }
            }
            accepted.push(plant);
        }
        self.changes.new_plant.extend(accepted);
        Ok(())
    }

    pub fn add_storage_capacity(&mut self, units: &[NewStorage]) -> GridResult<()> {
        for unit in units {
            if self.bus_site(unit.bus_id).is_none() {
                return Err(GridError::unknown("bus", unit.bus_id));
            }
            if !unit.capacity.is_finite() || unit.capacity < 0.0 {
                return Err(GridError::invalid(format!(
                    "storage capacity must be non-negative, got {}",
                    unit.capacity
                )));
            }
            if let Some(duration) = unit.duration {
                if !duration.is_finite() || duration <= 0.0 {
                    return Err(GridError::invalid(format!(
                        "storage duration must be positive, got {duration}"
                    )));
                }
            }
            check_fraction("min_stor", unit.min_stor)?;
            check_fraction("max_stor", unit.max_stor)?;
            check_fraction("terminal_min", unit.terminal_min)?;
            check_fraction("terminal_max", unit.terminal_max)?;
            check_fraction("InEff", unit.in_eff)?;
            check_fraction("OutEff", unit.out_eff)?;
            check_fraction("LossFactor", unit.loss_factor)?;
        }
        self.changes.storage.extend(units.iter().cloned());
        Ok(())
    }

    pub fn remove_branch(&mut self, ids: &[BranchId]) -> GridResult<()> {
        if let Some(id) = ids.iter().find(|id| !self.grid.branch.contains_key(id)) {
            return Err(GridError::unknown("branch", id));
        }
        self.changes.remove_branch.extend(ids.iter().copied());
        Ok(())
    }

    pub fn remove_dcline(&mut self, ids: &[DcLineId]) -> GridResult<()> {
        if let Some(id) = ids.iter().find(|id| !self.grid.dcline.contains_key(id)) {
            return Err(GridError::unknown("dcline", id));
        }
        self.changes.remove_dcline.extend(ids.iter().copied());
        Ok(())
    }

    pub fn remove_plant(&mut self, ids: &[PlantId]) -> GridResult<()> {
        if let Some(id) = ids.iter().find(|id| !self.grid.plant.contains_key(id)) {
            return Err(GridError::unknown("plant", id));
        }
        self.changes.remove_plant.extend(ids.iter().copied());
        Ok(())
    }

    /// Remove buses. Branches, DC lines and plants attached to them must
    /// already be scheduled for removal, and no declared element may use them.
    pub fn remove_bus(&mut self, ids: &[BusId]) -> GridResult<()> {
        let c = &self.changes;
        for id in ids {
            if !self.grid.bus.contains_key(id) {
                return Err(GridError::unknown("bus", id));
            }
            let branch = self.grid.branch.iter().find(|(bid, b)| {
                (b.from_bus_id == *id || b.to_bus_id == *id) && !c.remove_branch.contains(bid)
            });
            if let Some((bid, _)) = branch {
                return Err(GridError::invalid(format!(
                    "bus {id} still carries branch {bid}; remove the branch first"
                )));
            }
            let dcline = self.grid.dcline.iter().find(|(did, d)| {
                (d.from_bus_id == *id || d.to_bus_id == *id) && !c.remove_dcline.contains(did)
            });
            if let Some((did, _)) = dcline {
                return Err(GridError::invalid(format!(
                    "bus {id} still carries dcline {did}; remove the dcline first"
                )));
            }
            let plant = self
                .grid
                .plant
                .iter()
                .find(|(pid, p)| p.bus_id == *id && !c.remove_plant.contains(pid));
            if let Some((pid, _)) = plant {
                return Err(GridError::invalid(format!(
                    "bus {id} still carries plant {pid}; remove the plant first"
                )));
            }
            let storage_here = self.grid.storage.gen.values().any(|g| g.bus_id == *id);
            let declared_here = c
                .new_branch
                .iter()
                .any(|b| b.from_bus_id == *id || b.to_bus_id == *id)
                || c.new_dcline
                    .iter()
                    .any(|d| d.from_bus_id == *id || d.to_bus_id == *id)
                || c.new_plant.iter().any(|p| p.bus_id == *id)
                || c.storage.iter().any(|s| s.bus_id == *id);
            if storage_here || declared_here {
                return Err(GridError::invalid(format!(
                    "bus {id} hosts storage or declared elements and cannot be removed"
                )));
            }
        }
        self.changes.remove_bus.extend(ids.iter().copied());
        Ok(())
    }

    /// Add an electrification overlay of class `kind` (`building`,
    /// `transportation`). End uses already present are replaced.
    pub fn add_electrification(&mut self, kind: &str, spec: ElectrificationSpec) -> GridResult<()> {
        if !is_electrification_kind(kind) {
            return Err(GridError::invalid(format!(
                "unknown electrification class '{kind}'"
            )));
        }
        spec.validate(self.grid)?;
        self.changes
            .electrification
            .entry(kind.to_string())
            .or_default()
            .merge(spec);
        Ok(())
    }

    pub fn add_demand_flexibility(&mut self, spec: DemandFlexibilitySpec) -> GridResult<()> {
        spec.validate()?;
        self.changes.demand_flexibility = Some(spec);
        Ok(())
    }
}

fn zone_args(factors: &BTreeMap<ZoneId, f64>) -> Vec<(String, f64)> {
    factors.iter().map(|(id, f)| (id.to_string(), *f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::fixtures::{sample_grid, HOOVER};
    use serde_json::json;

    #[test]
    fn zone_scaling_accepts_names_and_ids() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_plant_capacity("solar", &[("Far West", 1.41), ("209", 2.0)], &[])
            .unwrap();
        let solar = &ct.changes().plant_scaling["solar"];
        assert_eq!(solar.zone_id[&ZoneId::new(301)], 1.41);
        assert_eq!(solar.zone_id[&ZoneId::new(209)], 2.0);
    }

    #[test]
    fn rejected_calls_leave_the_table_unchanged() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_plant_capacity("coal", &[], &[(PlantId::new(1), 2.0)])
            .unwrap();
        let before = ct.changes().clone();

        assert!(ct.scale_plant_capacity("unobtainium", &[("East", 2.0)], &[]).is_err());
        assert!(ct.scale_plant_capacity("coal", &[("Maine", 2.0)], &[]).is_err());
        assert!(ct.scale_plant_capacity("coal", &[("East", -1.0)], &[]).is_err());
        assert!(ct.scale_plant_capacity("coal", &[], &[(PlantId::new(2), 2.0)]).is_err());
        assert!(ct
            .scale_plant_capacity("coal", &[("East", 2.0)], &[(PlantId::new(99), 2.0)])
            .is_err());
        assert_eq!(ct.changes(), &before);
    }

    #[test]
    fn new_branch_may_reference_a_declared_bus() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        let new_bus = NextIds::of(&grid).bus;
        assert_eq!(new_bus, BusId::new(13));
        ct.add_bus(&[NewBus {
            lat: HOOVER.0,
            lon: HOOVER.1,
            zone_id: ZoneId::new(208),
            pd: 0.0,
            base_kv: 345.0,
        }])
        .unwrap();
        ct.add_branch(&[NewBranch {
            from_bus_id: new_bus,
            to_bus_id: BusId::new(11),
            pmax: 500.0,
        }])
        .unwrap();
        // Same location as bus 10.
        assert!(ct
            .add_branch(&[NewBranch {
                from_bus_id: new_bus,
                to_bus_id: BusId::new(10),
                pmax: 500.0,
            }])
            .is_err());
        // Crosses interconnects.
        assert!(ct
            .add_branch(&[NewBranch {
                from_bus_id: BusId::new(3),
                to_bus_id: BusId::new(12),
                pmax: 500.0,
            }])
            .is_err());
    }

    #[test]
    fn renewable_plants_get_the_nearest_neighbor() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        // Bus 10 sits at Hoover; solar plant 6 (Phoenix) is closer than plant 0 (Midland).
        ct.add_plant(&[NewPlant::new("solar", BusId::new(10), 75.0)])
            .unwrap();
        assert_eq!(
            ct.changes().new_plant[0].plant_id_neighbor,
            Some(PlantId::new(6))
        );
    }

    #[test]
    fn new_plant_arguments_are_checked() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        let mut plant = NewPlant::new("ng", BusId::new(3), 100.0);
        plant.pmin = 150.0;
        assert!(ct.add_plant(&[plant.clone()]).is_err());
        plant.pmin = 10.0;
        plant.c2 = -1.0;
        assert!(ct.add_plant(&[plant.clone()]).is_err());
        plant.c2 = 0.01;
        plant.bus_id = BusId::new(99);
        assert!(ct.add_plant(&[plant]).is_err());
        assert!(ct.changes().new_plant.is_empty());
    }

    #[test]
    fn declared_plants_can_be_scaled_by_id() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.add_plant(&[NewPlant::new("wind", BusId::new(12), 40.0)])
            .unwrap();
        let pending = NextIds::of(&grid).plant;
        assert_eq!(pending, PlantId::new(9));
        ct.scale_plant_capacity("wind", &[], &[(pending, 2.0)])
            .unwrap();
        assert!(ct
            .scale_plant_capacity("wind", &[], &[(pending.next(), 2.0)])
            .is_err());
    }

    #[test]
    fn bus_removal_requires_attached_elements_to_go_first() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        assert!(ct.remove_bus(&[BusId::new(2)]).is_err());
        ct.remove_branch(&[BranchId::new(1)]).unwrap();
        assert!(ct.remove_bus(&[BusId::new(2)]).is_err());
        ct.remove_plant(&[PlantId::new(0)]).unwrap();
        ct.remove_bus(&[BusId::new(2)]).unwrap();
        assert!(ct.changes().remove_bus.contains(&BusId::new(2)));
    }

    #[test]
    fn dcline_capacity_is_symmetric() {
        let line: NewDcLine = serde_json::from_value(json!({
            "from_bus_id": 3, "to_bus_id": 11, "capacity": 250.0
        }))
        .unwrap();
        assert_eq!((line.pmin, line.pmax), (-250.0, 250.0));
        let bad = serde_json::from_value::<NewDcLine>(json!({
            "from_bus_id": 3, "to_bus_id": 11, "Pmax": 250.0
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn dictionary_layout_round_trips() {
        let grid = sample_grid().unwrap();
        let doc = json!({
            "solar": {"zone_id": {"301": 1.41}},
            "ng_cost": {"plant_id": {"2": 0.8}},
            "coal_pmin": {"zone_id": {"308": 0.5}},
            "dcline": {"dcline_id": {"7": 0.0}},
            "demand": {"zone_id": {"208": 1.1}},
            "remove_branch": [5],
            "building": {"zone": {"East": {"res_cooking": {"advanced_heat_pump_v2": 0.7}}}}
        });
        let ct = ChangeTable::from_value(&grid, &doc).unwrap();
        let changes = ct.changes();
        assert_eq!(changes.cost_scaling["ng"].plant_id[&PlantId::new(2)], 0.8);
        assert_eq!(changes.pmin_scaling["coal"].zone_id[&ZoneId::new(308)], 0.5);
        assert!(changes.remove_branch.contains(&BranchId::new(5)));
        assert_eq!(changes.to_value().unwrap(), doc);
    }

    #[test]
    fn unknown_keys_fail() {
        let grid = sample_grid().unwrap();
        let doc = json!({"fusion": {"zone_id": {"301": 2.0}}});
        assert!(matches!(
            ChangeTable::from_value(&grid, &doc),
            Err(GridError::InvalidArgument(_))
        ));
        let doc = json!({"solar": {"area": {"301": 2.0}}});
        assert!(ChangeTable::from_value(&grid, &doc).is_err());
    }

    #[test]
    fn clear_key_drops_one_entry() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_plant_capacity("solar", &[("East", 2.0)], &[]).unwrap();
        ct.scale_plant_cost("solar", &[("East", 2.0)], &[]).unwrap();
        ct.clear_key("solar_cost").unwrap();
        assert!(ct.changes().cost_scaling.is_empty());
        assert!(!ct.changes().plant_scaling.is_empty());
        assert!(ct.clear_key("bogus").is_err());
        ct.clear();
        assert!(ct.changes().is_empty());
    }
}
