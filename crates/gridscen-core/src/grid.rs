//! The relational grid model.
//!
//! Every table is an ordered map keyed by its typed id, so iteration order
//! is the id order regardless of how the grid was built. Column names used
//! for serialization follow the canonical CSV headers.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::{GridError, GridResult};
use crate::ids::{BranchId, BusId, DcLineId, PlantId, StorageId, SubId, ZoneId};
use crate::immutables::{
    AreaType, GridModel, ModelImmutables, ResourceTaxonomy, StorageDefaults, Zone, ZoneTable,
};

/// Bus type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BusType {
    Pq = 1,
    Pv = 2,
    Slack = 3,
    Isolated = 4,
}

impl TryFrom<u8> for BusType {
    type Error = GridError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(BusType::Pq),
            2 => Ok(BusType::Pv),
            3 => Ok(BusType::Slack),
            4 => Ok(BusType::Isolated),
            other => Err(GridError::Parse(format!("invalid bus type {other}"))),
        }
    }
}

impl From<BusType> for u8 {
    fn from(kind: BusType) -> u8 {
        kind as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    #[serde(rename = "type")]
    pub bus_type: BusType,
    #[serde(rename = "Pd")]
    pub pd: f64,
    #[serde(rename = "Qd")]
    pub qd: f64,
    #[serde(rename = "Gs")]
    pub gs: f64,
    #[serde(rename = "Bs")]
    pub bs: f64,
    pub zone_id: ZoneId,
    #[serde(rename = "Vm")]
    pub vm: f64,
    #[serde(rename = "Va")]
    pub va: f64,
    #[serde(rename = "baseKV")]
    pub base_kv: f64,
    pub loss_zone: usize,
    #[serde(rename = "Vmax")]
    pub vmax: f64,
    #[serde(rename = "Vmin")]
    pub vmin: f64,
    pub lat: f64,
    pub lon: f64,
    pub interconnect: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substation {
    pub name: String,
    pub interconnect_sub_id: usize,
    pub lat: f64,
    pub lon: f64,
    pub interconnect: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusToSub {
    pub sub_id: SubId,
    pub interconnect: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchDeviceType {
    Line,
    Transformer,
    TransformerWinding,
}

impl BranchDeviceType {
    pub fn is_transformer(&self) -> bool {
        matches!(
            self,
            BranchDeviceType::Transformer | BranchDeviceType::TransformerWinding
        )
    }
}

impl std::str::FromStr for BranchDeviceType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Line" => Ok(BranchDeviceType::Line),
            "Transformer" => Ok(BranchDeviceType::Transformer),
            "TransformerWinding" => Ok(BranchDeviceType::TransformerWinding),
            other => Err(GridError::Parse(format!(
                "unknown branch device type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub from_bus_id: BusId,
    pub to_bus_id: BusId,
    pub r: f64,
    pub x: f64,
    pub b: f64,
    #[serde(rename = "rateA")]
    pub rate_a: f64,
    #[serde(rename = "rateB")]
    pub rate_b: f64,
    #[serde(rename = "rateC")]
    pub rate_c: f64,
    pub ratio: f64,
    pub angle: f64,
    pub status: u8,
    pub angmin: f64,
    pub angmax: f64,
    pub branch_device_type: BranchDeviceType,
    pub from_zone_id: ZoneId,
    pub to_zone_id: ZoneId,
    pub from_zone_name: String,
    pub to_zone_name: String,
    pub from_lat: f64,
    pub from_lon: f64,
    pub to_lat: f64,
    pub to_lon: f64,
    pub interconnect: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcLine {
    pub from_bus_id: BusId,
    pub to_bus_id: BusId,
    pub status: u8,
    #[serde(rename = "Pf")]
    pub pf: f64,
    #[serde(rename = "Pt")]
    pub pt: f64,
    #[serde(rename = "Qf")]
    pub qf: f64,
    #[serde(rename = "Qt")]
    pub qt: f64,
    #[serde(rename = "Vf")]
    pub vf: f64,
    #[serde(rename = "Vt")]
    pub vt: f64,
    #[serde(rename = "Pmin")]
    pub pmin: f64,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
    #[serde(rename = "QminF")]
    pub qmin_f: f64,
    #[serde(rename = "QmaxF")]
    pub qmax_f: f64,
    #[serde(rename = "QminT")]
    pub qmin_t: f64,
    #[serde(rename = "QmaxT")]
    pub qmax_t: f64,
    pub loss0: f64,
    pub loss1: f64,
    pub from_interconnect: String,
    pub to_interconnect: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub bus_id: BusId,
    #[serde(rename = "Pg")]
    pub pg: f64,
    #[serde(rename = "Qg")]
    pub qg: f64,
    #[serde(rename = "Qmax")]
    pub qmax: f64,
    #[serde(rename = "Qmin")]
    pub qmin: f64,
    #[serde(rename = "Vg")]
    pub vg: f64,
    #[serde(rename = "mBase")]
    pub mbase: f64,
    pub status: u8,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
    #[serde(rename = "Pmin")]
    pub pmin: f64,
    pub ramp_10: f64,
    #[serde(
        serialize_with = "crate::grid::serialize_ramp",
        deserialize_with = "crate::grid::deserialize_ramp"
    )]
    pub ramp_30: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "GenFuelCost")]
    pub gen_fuel_cost: f64,
    #[serde(rename = "GenIOB")]
    pub gen_iob: f64,
    #[serde(rename = "GenIOC")]
    pub gen_ioc: f64,
    #[serde(rename = "GenIOD")]
    pub gen_iod: f64,
    pub zone_id: ZoneId,
    pub zone_name: String,
    pub lat: f64,
    pub lon: f64,
    pub interconnect: String,
}

/// `ramp_30` is infinite for units without a ramp limit; JSON has no
/// infinity, so it travels as the string `"inf"`.
pub(crate) fn serialize_ramp<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    if value.is_infinite() {
        s.serialize_str("inf")
    } else {
        s.serialize_f64(*value)
    }
}

pub(crate) fn deserialize_ramp<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ramp {
        Number(f64),
        Text(String),
    }
    match Ramp::deserialize(d)? {
        Ramp::Number(v) => Ok(v),
        Ramp::Text(t) if t.eq_ignore_ascii_case("inf") => Ok(f64::INFINITY),
        Ramp::Text(t) => t.parse().map_err(serde::de::Error::custom),
    }
}

/// Cost model code of a gencost row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CostModel {
    Piecewise = 1,
    Polynomial = 2,
}

impl TryFrom<u8> for CostModel {
    type Error = GridError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(CostModel::Piecewise),
            2 => Ok(CostModel::Polynomial),
            other => Err(GridError::Parse(format!("invalid gencost type {other}"))),
        }
    }
}

impl From<CostModel> for u8 {
    fn from(model: CostModel) -> u8 {
        model as u8
    }
}

/// One gencost row.
///
/// `coefficients` follows the MATPOWER layout: for a polynomial it holds
/// the `n` coefficients from the highest order down to `c0`; for a
/// piecewise curve it holds `p1, f1, ..., pn, fn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenCost {
    #[serde(rename = "type")]
    pub model: CostModel,
    pub startup: f64,
    pub shutdown: f64,
    pub n: usize,
    pub coefficients: Vec<f64>,
    pub interconnect: String,
}

impl GenCost {
    pub fn quadratic(c2: f64, c1: f64, c0: f64, interconnect: &str) -> Self {
        Self {
            model: CostModel::Polynomial,
            startup: 0.0,
            shutdown: 0.0,
            n: 3,
            coefficients: vec![c2, c1, c0],
            interconnect: interconnect.to_string(),
        }
    }

    pub fn piecewise(points: &[(f64, f64)], interconnect: &str) -> Self {
        Self {
            model: CostModel::Piecewise,
            startup: 0.0,
            shutdown: 0.0,
            n: points.len(),
            coefficients: points.iter().flat_map(|(p, f)| [*p, *f]).collect(),
            interconnect: interconnect.to_string(),
        }
    }

    /// Coefficient of `P^power` for a polynomial row.
    pub fn coefficient(&self, power: usize) -> Option<f64> {
        if self.model != CostModel::Polynomial || power >= self.n {
            return None;
        }
        self.coefficients.get(self.n - 1 - power).copied()
    }

    pub fn coefficient_mut(&mut self, power: usize) -> Option<&mut f64> {
        if self.model != CostModel::Polynomial || power >= self.n {
            return None;
        }
        let n = self.n;
        self.coefficients.get_mut(n - 1 - power)
    }

    pub fn is_quadratic(&self) -> bool {
        self.model == CostModel::Polynomial && self.n == 3 && self.coefficients.len() == 3
    }

    /// Breakpoints of a piecewise row.
    pub fn points(&self) -> Vec<(f64, f64)> {
        if self.model != CostModel::Piecewise {
            return Vec::new();
        }
        self.coefficients
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }

    /// Evaluate a polynomial row at `p`.
    pub fn evaluate(&self, p: f64) -> Option<f64> {
        if self.model != CostModel::Polynomial {
            return None;
        }
        Some(self.coefficients.iter().fold(0.0, |acc, c| acc * p + c))
    }
}

/// Raw and linearized cost curves, keyed by plant id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenCostTables {
    pub before: BTreeMap<PlantId, GenCost>,
    pub after: BTreeMap<PlantId, GenCost>,
}

/// Generator row of a storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageGen {
    pub bus_id: BusId,
    #[serde(rename = "Pg")]
    pub pg: f64,
    #[serde(rename = "Qg")]
    pub qg: f64,
    #[serde(rename = "Qmax")]
    pub qmax: f64,
    #[serde(rename = "Qmin")]
    pub qmin: f64,
    #[serde(rename = "Vg")]
    pub vg: f64,
    #[serde(rename = "mBase")]
    pub mbase: f64,
    pub status: u8,
    #[serde(rename = "Pmax")]
    pub pmax: f64,
    #[serde(rename = "Pmin")]
    pub pmin: f64,
    pub ramp_10: f64,
    pub ramp_30: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageData {
    pub unit_idx: usize,
    pub initial_storage: f64,
    pub initial_storage_lower_bound: f64,
    pub initial_storage_upper_bound: f64,
    pub initial_storage_cost: f64,
    pub terminal_storage_price: f64,
    pub min_storage_level: f64,
    pub max_storage_level: f64,
    pub out_eff: f64,
    pub in_eff: f64,
    pub loss_factor: f64,
    #[serde(rename = "rho")]
    pub rho: f64,
    pub expected_terminal_storage_max: f64,
    pub expected_terminal_storage_min: f64,
}

/// Storage composite: four linked tables plus the model defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub gen: BTreeMap<StorageId, StorageGen>,
    pub gencost: BTreeMap<StorageId, GenCost>,
    #[serde(rename = "StorageData")]
    pub storage_data: BTreeMap<StorageId, StorageData>,
    /// One `"ess"` token per storage unit, in id order
    pub genfuel: Vec<String>,
    /// Parameters applied to entries that omit them
    pub defaults: StorageDefaults,
}

impl Storage {
    pub fn with_defaults(defaults: StorageDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.gen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gen.is_empty()
    }
}

/// An electrical grid: nine relational tables plus the constants of its model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GridRecord")]
pub struct Grid {
    pub grid_model: GridModel,
    /// Interconnects as requested; may contain aliases such as `USA`
    pub interconnect: Vec<String>,
    pub bus: BTreeMap<BusId, Bus>,
    pub sub: BTreeMap<SubId, Substation>,
    pub bus2sub: BTreeMap<BusId, BusToSub>,
    pub branch: BTreeMap<BranchId, Branch>,
    pub dcline: BTreeMap<DcLineId, DcLine>,
    pub plant: BTreeMap<PlantId, Plant>,
    pub gencost: GenCostTables,
    pub storage: Storage,
    pub zone2id: BTreeMap<String, ZoneId>,
    pub id2zone: BTreeMap<ZoneId, String>,
    #[serde(rename = "zone", serialize_with = "serialize_zone_table")]
    immutables: Arc<ModelImmutables>,
}

fn serialize_zone_table<S: Serializer>(
    immutables: &Arc<ModelImmutables>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.collect_seq(immutables.zones.zones.values())
}

/// Wire form of a [`Grid`]: the tables plus the model's zone rows.
#[derive(Deserialize)]
struct GridRecord {
    grid_model: GridModel,
    interconnect: Vec<String>,
    bus: BTreeMap<BusId, Bus>,
    sub: BTreeMap<SubId, Substation>,
    bus2sub: BTreeMap<BusId, BusToSub>,
    branch: BTreeMap<BranchId, Branch>,
    dcline: BTreeMap<DcLineId, DcLine>,
    plant: BTreeMap<PlantId, Plant>,
    gencost: GenCostTables,
    storage: Storage,
    zone2id: BTreeMap<String, ZoneId>,
    id2zone: BTreeMap<ZoneId, String>,
    zone: Vec<Zone>,
}

impl TryFrom<GridRecord> for Grid {
    type Error = GridError;

    fn try_from(record: GridRecord) -> Result<Self, Self::Error> {
        let zones = ModelImmutables::zone_table(record.grid_model, record.zone)?;
        Ok(Grid {
            grid_model: record.grid_model,
            interconnect: record.interconnect,
            bus: record.bus,
            sub: record.sub,
            bus2sub: record.bus2sub,
            branch: record.branch,
            dcline: record.dcline,
            plant: record.plant,
            gencost: record.gencost,
            storage: record.storage,
            zone2id: record.zone2id,
            id2zone: record.id2zone,
            immutables: Arc::new(ModelImmutables::with_zones(record.grid_model, zones)),
        })
    }
}

impl Grid {
    /// An empty grid over `interconnect`; zone mappings are set to the
    /// zones of those interconnects.
    pub fn empty(
        immutables: Arc<ModelImmutables>,
        interconnect: Vec<String>,
    ) -> GridResult<Self> {
        let mut grid = Grid {
            grid_model: immutables.model,
            interconnect,
            bus: BTreeMap::new(),
            sub: BTreeMap::new(),
            bus2sub: BTreeMap::new(),
            branch: BTreeMap::new(),
            dcline: BTreeMap::new(),
            plant: BTreeMap::new(),
            gencost: GenCostTables::default(),
            storage: Storage::with_defaults(immutables.storage),
            zone2id: BTreeMap::new(),
            id2zone: BTreeMap::new(),
            immutables,
        };
        grid.recompute_zone_mappings()?;
        Ok(grid)
    }

    pub fn immutables(&self) -> &ModelImmutables {
        &self.immutables
    }

    pub fn immutables_arc(&self) -> Arc<ModelImmutables> {
        Arc::clone(&self.immutables)
    }

    pub fn resources(&self) -> &ResourceTaxonomy {
        &self.immutables.resources
    }

    pub fn zone_table(&self) -> &ZoneTable {
        &self.immutables.zones
    }

    /// Concrete interconnects covered, with aliases expanded.
    pub fn interconnects(&self) -> GridResult<BTreeSet<String>> {
        let mut expanded = BTreeSet::new();
        for name in &self.interconnect {
            expanded.extend(self.immutables.zones.expand_interconnect(name)?);
        }
        Ok(expanded)
    }

    /// Reset `zone2id`/`id2zone` to the zones of the covered interconnects.
    pub fn recompute_zone_mappings(&mut self) -> GridResult<()> {
        let interconnects = self.interconnects()?;
        let zones = &self.immutables.zones;
        self.zone2id = zones
            .zones
            .values()
            .filter(|z| interconnects.contains(&z.interconnect))
            .map(|z| (z.zone_name.clone(), z.zone_id))
            .collect();
        self.id2zone = self
            .zone2id
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        Ok(())
    }

    pub fn zone_name(&self, zone_id: ZoneId) -> Option<&str> {
        self.id2zone.get(&zone_id).map(String::as_str)
    }

    /// Resolve a zone given by name or by id.
    pub fn resolve_zone(&self, zone: &str) -> GridResult<ZoneId> {
        if let Some(id) = self.zone2id.get(zone) {
            return Ok(*id);
        }
        zone.parse::<ZoneId>()
            .ok()
            .filter(|id| self.id2zone.contains_key(id))
            .ok_or_else(|| GridError::unknown("zone", zone))
    }

    /// Load zones of an area, restricted to the zones of this grid.
    pub fn area_to_loadzone(
        &self,
        area: &str,
        area_type: Option<AreaType>,
    ) -> GridResult<BTreeSet<String>> {
        let zones = self.immutables.zones.area_to_loadzone(area, area_type)?;
        let present: BTreeSet<String> = zones
            .into_iter()
            .filter(|z| self.zone2id.contains_key(z))
            .collect();
        if present.is_empty() {
            return Err(GridError::invalid(format!(
                "area '{area}' has no load zone in this grid"
            )));
        }
        Ok(present)
    }

    pub fn bus_interconnect(&self, bus_id: BusId) -> Option<&str> {
        self.bus.get(&bus_id).map(|b| b.interconnect.as_str())
    }

    /// Plants of `kind`, in id order.
    pub fn plants_of_type<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = (PlantId, &'a Plant)> + 'a {
        self.plant
            .iter()
            .filter(move |(_, p)| p.kind == kind)
            .map(|(id, p)| (*id, p))
    }

    /// Recompute columns that are functions of other tables: bus coordinates
    /// from the substation, plant location and zone from the bus, branch
    /// endpoint zones and coordinates from the endpoint buses.
    pub fn populate_derived_columns(&mut self) {
        for (bus_id, bus) in self.bus.iter_mut() {
            if let Some(sub) = self
                .bus2sub
                .get(bus_id)
                .and_then(|b2s| self.sub.get(&b2s.sub_id))
            {
                bus.lat = sub.lat;
                bus.lon = sub.lon;
            }
        }
        for plant in self.plant.values_mut() {
            if let Some(bus) = self.bus.get(&plant.bus_id) {
                plant.zone_id = bus.zone_id;
                plant.zone_name = self.id2zone.get(&bus.zone_id).cloned().unwrap_or_default();
                plant.lat = bus.lat;
                plant.lon = bus.lon;
                plant.interconnect = bus.interconnect.clone();
            }
        }
        for branch in self.branch.values_mut() {
            if let (Some(from), Some(to)) = (
                self.bus.get(&branch.from_bus_id),
                self.bus.get(&branch.to_bus_id),
            ) {
                branch.from_zone_id = from.zone_id;
                branch.to_zone_id = to.zone_id;
                branch.from_zone_name =
                    self.id2zone.get(&from.zone_id).cloned().unwrap_or_default();
                branch.to_zone_name = self.id2zone.get(&to.zone_id).cloned().unwrap_or_default();
                branch.from_lat = from.lat;
                branch.from_lon = from.lon;
                branch.to_lat = to.lat;
                branch.to_lon = to.lon;
                branch.interconnect = from.interconnect.clone();
            }
        }
        for dcline in self.dcline.values_mut() {
            if let Some(from) = self.bus.get(&dcline.from_bus_id) {
                dcline.from_interconnect = from.interconnect.clone();
            }
            if let Some(to) = self.bus.get(&dcline.to_bus_id) {
                dcline.to_interconnect = to.interconnect.clone();
            }
        }
        debug!(
            buses = self.bus.len(),
            plants = self.plant.len(),
            branches = self.branch.len(),
            "derived grid columns populated"
        );
    }
}

const RELATIVE_TOLERANCE: f64 = 1e-9;

fn close(a: f64, b: f64) -> bool {
    a == b
        || (a.is_nan() && b.is_nan())
        || (a - b).abs() <= RELATIVE_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn close_all(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| close(*x, *y))
}

fn tables_match<K: Ord, V>(
    a: &BTreeMap<K, V>,
    b: &BTreeMap<K, V>,
    same: impl Fn(&V, &V) -> bool,
) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && same(va, vb))
}

fn same_bus(a: &Bus, b: &Bus) -> bool {
    a.zone_id == b.zone_id
        && a.loss_zone == b.loss_zone
        && a.interconnect == b.interconnect
        && close_all(
            &[a.pd, a.qd, a.gs, a.bs, a.vm, a.va, a.base_kv, a.vmax, a.vmin, a.lat, a.lon],
            &[b.pd, b.qd, b.gs, b.bs, b.vm, b.va, b.base_kv, b.vmax, b.vmin, b.lat, b.lon],
        )
}

fn same_sub(a: &Substation, b: &Substation) -> bool {
    a.name == b.name
        && a.interconnect_sub_id == b.interconnect_sub_id
        && a.interconnect == b.interconnect
        && close(a.lat, b.lat)
        && close(a.lon, b.lon)
}

fn same_branch(a: &Branch, b: &Branch) -> bool {
    a.from_bus_id == b.from_bus_id
        && a.to_bus_id == b.to_bus_id
        && a.status == b.status
        && a.branch_device_type == b.branch_device_type
        && a.interconnect == b.interconnect
        && a.from_zone_id == b.from_zone_id
        && a.to_zone_id == b.to_zone_id
        && close_all(
            &[a.r, a.x, a.b, a.rate_a, a.rate_b, a.rate_c, a.ratio, a.angle, a.angmin, a.angmax],
            &[b.r, b.x, b.b, b.rate_a, b.rate_b, b.rate_c, b.ratio, b.angle, b.angmin, b.angmax],
        )
}

fn same_dcline(a: &DcLine, b: &DcLine) -> bool {
    a.from_bus_id == b.from_bus_id
        && a.to_bus_id == b.to_bus_id
        && a.status == b.status
        && close_all(
            &[a.pf, a.pt, a.qf, a.qt, a.vf, a.vt, a.pmin, a.pmax, a.loss0, a.loss1],
            &[b.pf, b.pt, b.qf, b.qt, b.vf, b.vt, b.pmin, b.pmax, b.loss0, b.loss1],
        )
}

// status, Pmin, ramp_10 and ramp_30 are rewritten by the simulator
fn same_plant(a: &Plant, b: &Plant) -> bool {
    a.bus_id == b.bus_id
        && a.kind == b.kind
        && a.zone_id == b.zone_id
        && a.interconnect == b.interconnect
        && close_all(
            &[a.pg, a.qg, a.qmax, a.qmin, a.vg, a.mbase, a.pmax, a.gen_fuel_cost, a.gen_iob],
            &[b.pg, b.qg, b.qmax, b.qmin, b.vg, b.mbase, b.pmax, b.gen_fuel_cost, b.gen_iob],
        )
        && close_all(&[a.gen_ioc, a.gen_iod], &[b.gen_ioc, b.gen_iod])
}

fn same_gencost(a: &GenCost, b: &GenCost) -> bool {
    a.model == b.model
        && a.n == b.n
        && close(a.startup, b.startup)
        && close(a.shutdown, b.shutdown)
        && close_all(&a.coefficients, &b.coefficients)
}

fn same_storage_gen(a: &StorageGen, b: &StorageGen) -> bool {
    a.bus_id == b.bus_id
        && a.status == b.status
        && close_all(
            &[a.pg, a.qg, a.qmax, a.qmin, a.vg, a.mbase, a.pmax, a.pmin],
            &[b.pg, b.qg, b.qmax, b.qmin, b.vg, b.mbase, b.pmax, b.pmin],
        )
}

fn same_storage_data(a: &StorageData, b: &StorageData) -> bool {
    a.unit_idx == b.unit_idx
        && close_all(
            &[
                a.initial_storage,
                a.initial_storage_lower_bound,
                a.initial_storage_upper_bound,
                a.initial_storage_cost,
                a.terminal_storage_price,
                a.min_storage_level,
                a.max_storage_level,
                a.out_eff,
                a.in_eff,
                a.loss_factor,
                a.rho,
                a.expected_terminal_storage_max,
                a.expected_terminal_storage_min,
            ],
            &[
                b.initial_storage,
                b.initial_storage_lower_bound,
                b.initial_storage_upper_bound,
                b.initial_storage_cost,
                b.terminal_storage_price,
                b.min_storage_level,
                b.max_storage_level,
                b.out_eff,
                b.in_eff,
                b.loss_factor,
                b.rho,
                b.expected_terminal_storage_max,
                b.expected_terminal_storage_min,
            ],
        )
}

/// Equality ignores the columns the simulator rewrites: plant status, Pmin
/// and ramps, bus type, the linearized gencost, storage gencost and the
/// ramp columns of storage generators.
impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.grid_model == other.grid_model
            && self.interconnects().ok() == other.interconnects().ok()
            && tables_match(&self.bus, &other.bus, same_bus)
            && tables_match(&self.sub, &other.sub, same_sub)
            && self.bus2sub == other.bus2sub
            && tables_match(&self.branch, &other.branch, same_branch)
            && tables_match(&self.dcline, &other.dcline, same_dcline)
            && tables_match(&self.plant, &other.plant, same_plant)
            && tables_match(&self.gencost.before, &other.gencost.before, same_gencost)
            && tables_match(&self.storage.gen, &other.storage.gen, same_storage_gen)
            && tables_match(
                &self.storage.storage_data,
                &other.storage.storage_data,
                same_storage_data,
            )
            && self.storage.genfuel == other.storage.genfuel
            && self.zone2id == other.zone2id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_coefficients_by_power() {
        let cost = GenCost::quadratic(0.0025, 30.0, 1500.0, "Texas");
        assert_eq!(cost.coefficient(2), Some(0.0025));
        assert_eq!(cost.coefficient(1), Some(30.0));
        assert_eq!(cost.coefficient(0), Some(1500.0));
        assert_eq!(cost.coefficient(3), None);
        assert!(cost.is_quadratic());
        assert_eq!(cost.evaluate(10.0), Some(0.25 + 300.0 + 1500.0));
    }

    #[test]
    fn piecewise_points() {
        let cost = GenCost::piecewise(&[(20.0, 487.0), (50.0, 2707.0)], "Western");
        assert_eq!(cost.n, 2);
        assert_eq!(cost.points(), vec![(20.0, 487.0), (50.0, 2707.0)]);
        assert_eq!(cost.coefficient(0), None);
        assert_eq!(cost.evaluate(1.0), None);
    }

    #[test]
    fn infinite_ramp_survives_json() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(serialize_with = "serialize_ramp", deserialize_with = "deserialize_ramp")]
            ramp: f64,
        }
        let json = serde_json::to_string(&Wrapper { ramp: f64::INFINITY }).unwrap();
        assert_eq!(json, r#"{"ramp":"inf"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert!(back.ramp.is_infinite());
        let back: Wrapper = serde_json::from_str(r#"{"ramp":12.5}"#).unwrap();
        assert_eq!(back.ramp, 12.5);
    }

    #[test]
    fn codes_reject_unknown_values() {
        assert!(BusType::try_from(5).is_err());
        assert_eq!(u8::from(BusType::Slack), 3);
        assert!(CostModel::try_from(3).is_err());
        assert!("Cable".parse::<BranchDeviceType>().is_err());
        assert!(BranchDeviceType::TransformerWinding.is_transformer());
    }

    #[test]
    fn tolerance_is_relative() {
        assert!(close(1e6, 1e6 * (1.0 + 1e-12)));
        assert!(!close(1.0, 1.001));
        assert!(close(f64::INFINITY, f64::INFINITY));
    }
}
