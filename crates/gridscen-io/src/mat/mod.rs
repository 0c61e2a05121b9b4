//! Import of simulator MAT-files.
//!
//! The simulator keeps its case in the struct `mdi`: `mdi.mpc` holds the
//! MATPOWER tables (`bus`, `gen`, `branch`, `gencost`, optional `dcline`)
//! and the id vectors (`busid`, `genid`, `branchid`, `dclineid`), and
//! `mdi.Storage` holds `gen`, `gencost` and `StorageData`. A bare `mpc`
//! struct and the flat layout written by `save(f, '-struct', 'mpc')` are
//! read as well. Categorical columns (fuel type, branch device type) and
//! substation/zone metadata are not numeric; they come from the CSV bundle
//! the case was built from.

pub mod layout;

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use gridscen_core::{
    check_grid, Branch, BranchId, Bus, BusId, BusToSub, BusType, CostModel, DcLine, DcLineId,
    GenCost, Grid, GridError, GridModel, Plant, PlantId, StorageData, StorageGen, StorageId,
    ZoneId,
};

use crate::conversions::{id_from_f64, safe_f64_to_u8, safe_f64_to_usize, status_flag};
use crate::csv_bundle::load_csv_bundle;
pub use layout::MatCase;

/// Struct prefixes searched for a MATPOWER table, in order.
const CASE_PREFIXES: [&str; 3] = ["mdi.mpc.", "mpc.", ""];
const STORAGE_PREFIX: &str = "mdi.Storage.";

// MATPOWER column indices (zero-based)
mod idx {
    pub const BUS_I: usize = 0;
    pub const BUS_TYPE: usize = 1;
    pub const PD: usize = 2;
    pub const QD: usize = 3;
    pub const GS: usize = 4;
    pub const BS: usize = 5;
    pub const BUS_AREA: usize = 6;
    pub const VM: usize = 7;
    pub const VA: usize = 8;
    pub const BASE_KV: usize = 9;
    pub const ZONE: usize = 10;
    pub const VMAX: usize = 11;
    pub const VMIN: usize = 12;
    pub const BUS_COLS: usize = 13;

    pub const GEN_BUS: usize = 0;
    pub const PG: usize = 1;
    pub const QG: usize = 2;
    pub const QMAX: usize = 3;
    pub const QMIN: usize = 4;
    pub const VG: usize = 5;
    pub const MBASE: usize = 6;
    pub const GEN_STATUS: usize = 7;
    pub const PMAX: usize = 8;
    pub const PMIN: usize = 9;
    pub const RAMP_10: usize = 17;
    pub const RAMP_30: usize = 18;
    pub const GEN_COLS: usize = 19;

    pub const F_BUS: usize = 0;
    pub const T_BUS: usize = 1;
    pub const BR_R: usize = 2;
    pub const BR_X: usize = 3;
    pub const BR_B: usize = 4;
    pub const RATE_A: usize = 5;
    pub const RATE_B: usize = 6;
    pub const RATE_C: usize = 7;
    pub const TAP: usize = 8;
    pub const SHIFT: usize = 9;
    pub const BR_STATUS: usize = 10;
    pub const ANGMIN: usize = 11;
    pub const ANGMAX: usize = 12;
    pub const BRANCH_COLS: usize = 13;

    pub const DC_STATUS: usize = 2;
    pub const PF: usize = 3;
    pub const PT: usize = 4;
    pub const QF: usize = 5;
    pub const QT: usize = 6;
    pub const VF: usize = 7;
    pub const VT: usize = 8;
    pub const DC_PMIN: usize = 9;
    pub const DC_PMAX: usize = 10;
    pub const QMINF: usize = 11;
    pub const QMAXF: usize = 12;
    pub const QMINT: usize = 13;
    pub const QMAXT: usize = 14;
    pub const LOSS0: usize = 15;
    pub const LOSS1: usize = 16;
    pub const DCLINE_COLS: usize = 17;

    pub const MODEL: usize = 0;
    pub const STARTUP: usize = 1;
    pub const SHUTDOWN: usize = 2;
    pub const NCOST: usize = 3;
    pub const COST: usize = 4;

    pub const STORAGE_DATA_COLS: usize = 14;
}

/// Options of [`load_mat_grid`].
#[derive(Debug, Clone, Copy)]
pub struct MatImportOptions {
    /// Map the simulator's consecutive bus numbers back through `busid`
    pub reindex_buses: bool,
}

impl Default for MatImportOptions {
    fn default() -> Self {
        Self {
            reindex_buses: true,
        }
    }
}

/// Column-major numeric matrix.
#[derive(Debug, Clone)]
struct Matrix {
    name: String,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    fn get(&self, row: usize, col: usize) -> f64 {
        self.data[col * self.rows + row]
    }

    fn require_cols(&self, min: usize) -> Result<()> {
        if self.rows > 0 && self.cols < min {
            bail!(
                "{} has {} columns, expected at least {}",
                self.name,
                self.cols,
                min
            );
        }
        Ok(())
    }

    /// Entries of a row or column vector.
    fn vector(&self) -> Result<&[f64]> {
        if self.rows > 1 && self.cols > 1 {
            bail!("{} is a {}x{} matrix, expected a vector", self.name, self.rows, self.cols);
        }
        Ok(&self.data)
    }
}

fn numeric_data(array: &matfile::Array) -> Vec<f64> {
    match array.data() {
        matfile::NumericData::Double { real, .. } => real.clone(),
        matfile::NumericData::Single { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::Int8 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::UInt8 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::Int16 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::UInt16 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::Int32 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::UInt32 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::Int64 { real, .. } => real.iter().map(|&x| x as f64).collect(),
        matfile::NumericData::UInt64 { real, .. } => real.iter().map(|&x| x as f64).collect(),
    }
}

fn matrix_at(case: &MatCase, path: &str, label: &str) -> Result<Option<Matrix>> {
    let Some(array) = case.array(path) else {
        return Ok(None);
    };
    let dims = array.size();
    if dims.len() != 2 {
        bail!("{} has {} dimensions, expected 2", label, dims.len());
    }
    let data = numeric_data(array);
    if data.len() != dims[0] * dims[1] {
        bail!(
            "{} holds {} values for a {}x{} matrix",
            label,
            data.len(),
            dims[0],
            dims[1]
        );
    }
    Ok(Some(Matrix {
        name: label.to_string(),
        rows: dims[0],
        cols: dims[1],
        data,
    }))
}

/// A MATPOWER table from whichever case struct holds it.
fn read_matrix(case: &MatCase, name: &str) -> Result<Option<Matrix>> {
    for prefix in CASE_PREFIXES {
        if let Some(matrix) = matrix_at(case, &format!("{prefix}{name}"), name)? {
            return Ok(Some(matrix));
        }
    }
    Ok(None)
}

fn require_matrix(case: &MatCase, name: &str) -> Result<Matrix> {
    read_matrix(case, name)?.ok_or_else(|| GridError::missing(format!("{name} matrix")).into())
}

/// Ids of a table: the id vector when present, otherwise `0..rows`.
fn table_ids<I: From<usize>>(case: &MatCase, name: &str, rows: usize) -> Result<Vec<I>> {
    match read_matrix(case, name)? {
        Some(ids) => {
            let values = ids.vector()?;
            if values.len() != rows {
                bail!("{} has {} entries for {} rows", name, values.len(), rows);
            }
            values.iter().map(|v| id_from_f64(*v)).collect()
        }
        None => Ok((0..rows).map(I::from).collect()),
    }
}

fn reference_missing(kind: &'static str, id: impl ToString) -> anyhow::Error {
    anyhow!(GridError::unknown(kind, id)).context("element absent from the CSV bundle")
}

/// Rows of a gencost matrix as [`GenCost`] records.
fn read_gencost(matrix: &Matrix, row: usize, interconnect: &str) -> Result<GenCost> {
    let model = CostModel::try_from(safe_f64_to_u8(matrix.get(row, idx::MODEL))?)?;
    let n = safe_f64_to_usize(matrix.get(row, idx::NCOST))?;
    let width = match model {
        CostModel::Polynomial => n,
        CostModel::Piecewise => 2 * n,
    };
    if idx::COST + width > matrix.cols {
        return Err(GridError::MalformedGencost(format!(
            "{} row {} declares n = {} but has {} columns",
            matrix.name,
            row + 1,
            n,
            matrix.cols
        ))
        .into());
    }
    Ok(GenCost {
        model,
        startup: matrix.get(row, idx::STARTUP),
        shutdown: matrix.get(row, idx::SHUTDOWN),
        n,
        coefficients: (0..width)
            .map(|k| matrix.get(row, idx::COST + k))
            .collect(),
        interconnect: interconnect.to_string(),
    })
}

/// Load a simulator case. `bundle` is the CSV bundle of the grid the case
/// was built from; it supplies categorical columns, substations and the
/// base cost curves.
pub fn load_mat_grid(
    path: &Path,
    bundle: &Path,
    model: GridModel,
    interconnect: &[String],
    options: MatImportOptions,
) -> Result<Grid> {
    let case = MatCase::open(path)?;
    let reference = load_csv_bundle(bundle, model, interconnect)
        .with_context(|| format!("loading categorical data for {}", path.display()))?;
    let grid = grid_from_case(&case, &reference, options)
        .with_context(|| format!("building grid from {}", path.display()))?;
    info!(
        path = %path.display(),
        buses = grid.bus.len(),
        plants = grid.plant.len(),
        storage = grid.storage.len(),
        "loaded MAT-file grid"
    );
    Ok(grid)
}

/// Combine the numeric tables of `case` with the categorical data of
/// `reference`.
pub fn grid_from_case(file: &MatCase, reference: &Grid, options: MatImportOptions) -> Result<Grid> {
    let mut grid = Grid::empty(reference.immutables_arc(), reference.interconnect.clone())?;
    grid.storage.defaults = reference.storage.defaults;

    // buses
    let bus = require_matrix(file, "bus")?;
    bus.require_cols(idx::BUS_COLS)?;
    let external_ids: Option<Vec<BusId>> =
        if options.reindex_buses && read_matrix(file, "busid")?.is_some() {
            Some(table_ids(file, "busid", bus.rows)?)
        } else {
            None
        };
    let mut bus_map: BTreeMap<usize, BusId> = BTreeMap::new();
    for row in 0..bus.rows {
        let number = safe_f64_to_usize(bus.get(row, idx::BUS_I))?;
        let bus_id = match &external_ids {
            Some(ids) => ids[row],
            None => BusId::new(number),
        };
        bus_map.insert(number, bus_id);
        let reference_bus = reference
            .bus
            .get(&bus_id)
            .ok_or_else(|| reference_missing("bus", bus_id))?;
        let bus_type = BusType::try_from(safe_f64_to_u8(bus.get(row, idx::BUS_TYPE))?)?;
        grid.bus.insert(
            bus_id,
            Bus {
                bus_type,
                pd: bus.get(row, idx::PD),
                qd: bus.get(row, idx::QD),
                gs: bus.get(row, idx::GS),
                bs: bus.get(row, idx::BS),
                zone_id: ZoneId::new(safe_f64_to_usize(bus.get(row, idx::BUS_AREA))?),
                vm: bus.get(row, idx::VM),
                va: bus.get(row, idx::VA),
                base_kv: bus.get(row, idx::BASE_KV),
                loss_zone: safe_f64_to_usize(bus.get(row, idx::ZONE))?,
                vmax: bus.get(row, idx::VMAX),
                vmin: bus.get(row, idx::VMIN),
                lat: reference_bus.lat,
                lon: reference_bus.lon,
                interconnect: reference_bus.interconnect.clone(),
            },
        );
        let entry = reference
            .bus2sub
            .get(&bus_id)
            .ok_or_else(|| reference_missing("bus2sub entry", bus_id))?;
        grid.bus2sub.insert(
            bus_id,
            BusToSub {
                sub_id: entry.sub_id,
                interconnect: entry.interconnect.clone(),
            },
        );
        if let Some(sub) = reference.sub.get(&entry.sub_id) {
            grid.sub.insert(entry.sub_id, sub.clone());
        }
    }
    let map_bus = |value: f64| -> Result<BusId> {
        let number = safe_f64_to_usize(value)?;
        bus_map
            .get(&number)
            .copied()
            .ok_or_else(|| anyhow!(GridError::unknown("bus", number)))
    };

    // generators and their costs
    let gen = require_matrix(file, "gen")?;
    gen.require_cols(idx::GEN_COLS)?;
    let gencost = require_matrix(file, "gencost")?;
    if gencost.rows != gen.rows {
        bail!(
            "gencost has {} rows for {} generators",
            gencost.rows,
            gen.rows
        );
    }
    gencost.require_cols(idx::COST)?;
    let plant_ids: Vec<PlantId> = table_ids(file, "genid", gen.rows)?;
    for (row, plant_id) in plant_ids.iter().copied().enumerate() {
        let reference_plant = reference
            .plant
            .get(&plant_id)
            .ok_or_else(|| reference_missing("plant", plant_id))?;
        let before = reference
            .gencost
            .before
            .get(&plant_id)
            .ok_or_else(|| reference_missing("gencost", plant_id))?;
        let bus_id = map_bus(gen.get(row, idx::GEN_BUS))?;
        grid.plant.insert(
            plant_id,
            Plant {
                bus_id,
                pg: gen.get(row, idx::PG),
                qg: gen.get(row, idx::QG),
                qmax: gen.get(row, idx::QMAX),
                qmin: gen.get(row, idx::QMIN),
                vg: gen.get(row, idx::VG),
                mbase: gen.get(row, idx::MBASE),
                status: status_flag(gen.get(row, idx::GEN_STATUS))?,
                pmax: gen.get(row, idx::PMAX),
                pmin: gen.get(row, idx::PMIN),
                ramp_10: gen.get(row, idx::RAMP_10),
                ramp_30: gen.get(row, idx::RAMP_30),
                ..reference_plant.clone()
            },
        );
        grid.gencost.before.insert(plant_id, before.clone());
        grid.gencost
            .after
            .insert(plant_id, read_gencost(&gencost, row, &before.interconnect)?);
    }

    // branches
    let branch = require_matrix(file, "branch")?;
    branch.require_cols(idx::BRANCH_COLS)?;
    let branch_ids: Vec<BranchId> = table_ids(file, "branchid", branch.rows)?;
    for (row, branch_id) in branch_ids.iter().copied().enumerate() {
        let reference_branch = reference
            .branch
            .get(&branch_id)
            .ok_or_else(|| reference_missing("branch", branch_id))?;
        grid.branch.insert(
            branch_id,
            Branch {
                from_bus_id: map_bus(branch.get(row, idx::F_BUS))?,
                to_bus_id: map_bus(branch.get(row, idx::T_BUS))?,
                r: branch.get(row, idx::BR_R),
                x: branch.get(row, idx::BR_X),
                b: branch.get(row, idx::BR_B),
                rate_a: branch.get(row, idx::RATE_A),
                rate_b: branch.get(row, idx::RATE_B),
                rate_c: branch.get(row, idx::RATE_C),
                ratio: branch.get(row, idx::TAP),
                angle: branch.get(row, idx::SHIFT),
                status: status_flag(branch.get(row, idx::BR_STATUS))?,
                angmin: branch.get(row, idx::ANGMIN),
                angmax: branch.get(row, idx::ANGMAX),
                ..reference_branch.clone()
            },
        );
    }

    // DC lines
    if let Some(dcline) = read_matrix(file, "dcline")? {
        dcline.require_cols(idx::DCLINE_COLS)?;
        let dcline_ids: Vec<DcLineId> = table_ids(file, "dclineid", dcline.rows)?;
        for (row, dcline_id) in dcline_ids.iter().copied().enumerate() {
            grid.dcline.insert(
                dcline_id,
                DcLine {
                    from_bus_id: map_bus(dcline.get(row, idx::F_BUS))?,
                    to_bus_id: map_bus(dcline.get(row, idx::T_BUS))?,
                    status: status_flag(dcline.get(row, idx::DC_STATUS))?,
                    pf: dcline.get(row, idx::PF),
                    pt: dcline.get(row, idx::PT),
                    qf: dcline.get(row, idx::QF),
                    qt: dcline.get(row, idx::QT),
                    vf: dcline.get(row, idx::VF),
                    vt: dcline.get(row, idx::VT),
                    pmin: dcline.get(row, idx::DC_PMIN),
                    pmax: dcline.get(row, idx::DC_PMAX),
                    qmin_f: dcline.get(row, idx::QMINF),
                    qmax_f: dcline.get(row, idx::QMAXF),
                    qmin_t: dcline.get(row, idx::QMINT),
                    qmax_t: dcline.get(row, idx::QMAXT),
                    loss0: dcline.get(row, idx::LOSS0),
                    loss1: dcline.get(row, idx::LOSS1),
                    from_interconnect: String::new(),
                    to_interconnect: String::new(),
                },
            );
        }
    }

    read_storage(file, &mut grid, &map_bus)?;

    grid.populate_derived_columns();
    check_grid(&grid).context("validating imported grid")?;
    Ok(grid)
}

fn storage_matrix(case: &MatCase, member: &str, flat: &str) -> Result<Option<Matrix>> {
    match matrix_at(case, &format!("{STORAGE_PREFIX}{member}"), flat)? {
        Some(matrix) => Ok(Some(matrix)),
        None => matrix_at(case, flat, flat),
    }
}

/// `StorageData` as a matrix, or assembled from a struct of column vectors
/// named as in [`STORAGE_DATA_COLUMNS`].
fn storage_data(case: &MatCase, rows: usize) -> Result<Matrix> {
    if let Some(matrix) = storage_matrix(case, "StorageData", "storage_data")? {
        return Ok(matrix);
    }
    let mut data = Vec::with_capacity(rows * idx::STORAGE_DATA_COLS);
    for column in STORAGE_DATA_COLUMNS {
        let path = format!("{STORAGE_PREFIX}StorageData.{column}");
        let values = matrix_at(case, &path, column)?
            .ok_or_else(|| GridError::missing(format!("{path} vector")))?;
        let values = values.vector()?;
        if values.len() != rows {
            bail!("{} has {} entries for {} storage units", path, values.len(), rows);
        }
        data.extend_from_slice(values);
    }
    Ok(Matrix {
        name: "StorageData".to_string(),
        rows,
        cols: idx::STORAGE_DATA_COLS,
        data,
    })
}

fn read_storage(
    file: &MatCase,
    grid: &mut Grid,
    map_bus: &dyn Fn(f64) -> Result<BusId>,
) -> Result<()> {
    let Some(gen) = storage_matrix(file, "gen", "storage_gen")? else {
        return Ok(());
    };
    if gen.rows == 0 {
        return Ok(());
    }
    gen.require_cols(idx::GEN_COLS)?;
    let gencost = storage_matrix(file, "gencost", "storage_gencost")?
        .ok_or_else(|| GridError::missing("storage gencost matrix"))?;
    let data = storage_data(file, gen.rows)?;
    if gencost.rows != gen.rows || data.rows != gen.rows {
        bail!(
            "storage blocks disagree: {} generators, {} gencost rows, {} data rows",
            gen.rows,
            gencost.rows,
            data.rows
        );
    }
    data.require_cols(idx::STORAGE_DATA_COLS)?;
    for row in 0..gen.rows {
        let storage_id = StorageId::new(row);
        let bus_id = map_bus(gen.get(row, idx::GEN_BUS))?;
        let interconnect = grid
            .bus_interconnect(bus_id)
            .unwrap_or_default()
            .to_string();
        grid.storage.gen.insert(
            storage_id,
            StorageGen {
                bus_id,
                pg: gen.get(row, idx::PG),
                qg: gen.get(row, idx::QG),
                qmax: gen.get(row, idx::QMAX),
                qmin: gen.get(row, idx::QMIN),
                vg: gen.get(row, idx::VG),
                mbase: gen.get(row, idx::MBASE),
                status: status_flag(gen.get(row, idx::GEN_STATUS))?,
                pmax: gen.get(row, idx::PMAX),
                pmin: gen.get(row, idx::PMIN),
                ramp_10: gen.get(row, idx::RAMP_10),
                ramp_30: gen.get(row, idx::RAMP_30),
            },
        );
        grid.storage
            .gencost
            .insert(storage_id, read_gencost(&gencost, row, &interconnect)?);
        // column order of the simulator's StorageData table
        let col = |c: usize| data.get(row, c);
        grid.storage.storage_data.insert(
            storage_id,
            StorageData {
                unit_idx: safe_f64_to_usize(col(0))?,
                expected_terminal_storage_max: col(1),
                expected_terminal_storage_min: col(2),
                initial_storage: col(3),
                initial_storage_lower_bound: col(4),
                initial_storage_upper_bound: col(5),
                initial_storage_cost: col(6),
                terminal_storage_price: col(7),
                min_storage_level: col(8),
                max_storage_level: col(9),
                out_eff: col(10),
                in_eff: col(11),
                loss_factor: col(12),
                rho: col(13),
            },
        );
        grid.storage.genfuel.push("ess".to_string());
    }
    debug!(units = gen.rows, "read storage blocks");
    Ok(())
}

/// Column order of `StorageData`; also the member names of its struct form.
pub const STORAGE_DATA_COLUMNS: [&str; idx::STORAGE_DATA_COLS] = [
    "UnitIdx",
    "ExpectedTerminalStorageMax",
    "ExpectedTerminalStorageMin",
    "InitialStorage",
    "InitialStorageLowerBound",
    "InitialStorageUpperBound",
    "InitialStorageCost",
    "TerminalStoragePrice",
    "MinStorageLevel",
    "MaxStorageLevel",
    "OutEff",
    "InEff",
    "LossFactor",
    "rho",
];
