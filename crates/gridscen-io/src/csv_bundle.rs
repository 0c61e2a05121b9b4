//! Canonical CSV grid bundle.
//!
//! A bundle is a directory holding `bus.csv`, `sub.csv`, `bus2sub.csv`,
//! `branch.csv`, `dcline.csv`, `plant.csv`, `gencost.csv` and `zone.csv`.
//! Loading keeps only the rows of the requested interconnects, recomputes
//! the zone mappings on that subset and validates the result.

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, Writer};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use gridscen_core::{
    check_grid, Branch, BranchDeviceType, BranchId, Bus, BusId, BusToSub, BusType, CostModel,
    DcLine, DcLineId, GenCost, Grid, GridError, GridModel, ModelImmutables, Plant, PlantId,
    SubId, Substation, Zone, ZoneId,
};

use crate::conversions::{safe_f64_to_u8, status_flag};

pub const BUNDLE_TABLES: [&str; 8] = [
    "bus.csv",
    "sub.csv",
    "bus2sub.csv",
    "branch.csv",
    "dcline.csv",
    "plant.csv",
    "gencost.csv",
    "zone.csv",
];

fn one() -> f64 {
    1.0
}

fn default_vmax() -> f64 {
    1.1
}

fn default_vmin() -> f64 {
    0.9
}

#[derive(Debug, Deserialize)]
struct ZoneRecord {
    zone_id: usize,
    zone_name: String,
    #[serde(alias = "state", alias = "country")]
    division: String,
    interconnect: String,
    time_zone: String,
    abv: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BusRecord {
    bus_id: usize,
    #[serde(rename = "type")]
    bus_type: f64,
    #[serde(rename = "Pd")]
    pd: f64,
    #[serde(rename = "Qd", default)]
    qd: f64,
    #[serde(rename = "Gs", default)]
    gs: f64,
    #[serde(rename = "Bs", default)]
    bs: f64,
    zone_id: usize,
    #[serde(rename = "Vm", default = "one")]
    vm: f64,
    #[serde(rename = "Va", default)]
    va: f64,
    #[serde(rename = "baseKV")]
    base_kv: f64,
    #[serde(default = "one")]
    loss_zone: f64,
    #[serde(rename = "Vmax", default = "default_vmax")]
    vmax: f64,
    #[serde(rename = "Vmin", default = "default_vmin")]
    vmin: f64,
    interconnect: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubRecord {
    sub_id: usize,
    name: String,
    interconnect_sub_id: usize,
    lat: f64,
    lon: f64,
    interconnect: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Bus2SubRecord {
    bus_id: usize,
    sub_id: usize,
    interconnect: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BranchRecord {
    branch_id: usize,
    from_bus_id: usize,
    to_bus_id: usize,
    r: f64,
    x: f64,
    #[serde(default)]
    b: f64,
    #[serde(rename = "rateA")]
    rate_a: f64,
    #[serde(rename = "rateB", default)]
    rate_b: f64,
    #[serde(rename = "rateC", default)]
    rate_c: f64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    angle: f64,
    status: f64,
    #[serde(default)]
    angmin: f64,
    #[serde(default)]
    angmax: f64,
    branch_device_type: String,
    interconnect: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DcLineRecord {
    dcline_id: usize,
    from_bus_id: usize,
    to_bus_id: usize,
    status: f64,
    #[serde(rename = "Pf", default)]
    pf: f64,
    #[serde(rename = "Pt", default)]
    pt: f64,
    #[serde(rename = "Qf", default)]
    qf: f64,
    #[serde(rename = "Qt", default)]
    qt: f64,
    #[serde(rename = "Vf", default = "one")]
    vf: f64,
    #[serde(rename = "Vt", default = "one")]
    vt: f64,
    #[serde(rename = "Pmin")]
    pmin: f64,
    #[serde(rename = "Pmax")]
    pmax: f64,
    #[serde(rename = "QminF", default)]
    qmin_f: f64,
    #[serde(rename = "QmaxF", default)]
    qmax_f: f64,
    #[serde(rename = "QminT", default)]
    qmin_t: f64,
    #[serde(rename = "QmaxT", default)]
    qmax_t: f64,
    #[serde(default)]
    loss0: f64,
    #[serde(default)]
    loss1: f64,
    from_interconnect: String,
    to_interconnect: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlantRecord {
    plant_id: usize,
    bus_id: usize,
    #[serde(rename = "Pg", default)]
    pg: f64,
    #[serde(rename = "Qg", default)]
    qg: f64,
    #[serde(rename = "Qmax", default)]
    qmax: f64,
    #[serde(rename = "Qmin", default)]
    qmin: f64,
    #[serde(rename = "Vg", default = "one")]
    vg: f64,
    #[serde(rename = "mBase", default)]
    mbase: f64,
    status: f64,
    #[serde(rename = "Pmax")]
    pmax: f64,
    #[serde(rename = "Pmin")]
    pmin: f64,
    #[serde(default)]
    ramp_10: f64,
    #[serde(default)]
    ramp_30: f64,
    #[serde(rename = "type")]
    kind: String,
    interconnect: String,
    #[serde(rename = "GenFuelCost", default)]
    gen_fuel_cost: f64,
    #[serde(rename = "GenIOB", default)]
    gen_iob: f64,
    #[serde(rename = "GenIOC", default)]
    gen_ioc: f64,
    #[serde(rename = "GenIOD", default)]
    gen_iod: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenCostRecord {
    plant_id: usize,
    #[serde(rename = "type")]
    model: f64,
    #[serde(default)]
    startup: f64,
    #[serde(default)]
    shutdown: f64,
    n: f64,
    c2: f64,
    c1: f64,
    c0: f64,
    interconnect: String,
}

fn read_table<R: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<R>> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(GridError::missing(path.display().to_string()).into());
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let record: R =
            result.with_context(|| format!("parsing {} record {}", name, line + 1))?;
        rows.push(record);
    }
    debug!(table = name, rows = rows.len(), "read csv table");
    Ok(rows)
}

fn write_table<R: Serialize>(dir: &Path, name: &str, rows: impl IntoIterator<Item = R>) -> Result<()> {
    let path = dir.join(name);
    let mut wtr = Writer::from_path(&path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("writing {} record", name))?;
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

fn insert_unique<K: Ord + std::fmt::Display, V>(
    table: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    name: &str,
) -> Result<()> {
    if table.contains_key(&key) {
        bail!("duplicate id {} in {}", key, name);
    }
    table.insert(key, value);
    Ok(())
}

/// Read the zone table of a bundle, if it ships one.
pub fn read_zone_table(dir: &Path) -> Result<Option<Vec<Zone>>> {
    if !dir.join("zone.csv").exists() {
        return Ok(None);
    }
    let records: Vec<ZoneRecord> = read_table(dir, "zone.csv")?;
    Ok(Some(
        records
            .into_iter()
            .map(|r| Zone {
                zone_id: ZoneId::new(r.zone_id),
                zone_name: r.zone_name,
                division: r.division,
                interconnect: r.interconnect,
                time_zone: r.time_zone,
                abv: r.abv,
            })
            .collect(),
    ))
}

fn load_immutables(dir: &Path, model: GridModel) -> Result<Arc<ModelImmutables>> {
    match read_zone_table(dir)? {
        Some(zones) => {
            let table = ModelImmutables::zone_table(model, zones)
                .context("building zone table from zone.csv")?;
            Ok(Arc::new(ModelImmutables::with_zones(model, table)))
        }
        None => ModelImmutables::builtin(model)
            .with_context(|| format!("{} has no zone.csv", dir.display())),
    }
}

/// Load a grid from a CSV bundle, keeping only the requested interconnects.
///
/// `interconnect` may contain aliases (`USA`, `Texas_Western`). The
/// returned grid has its derived columns populated and passes every
/// invariant check.
pub fn load_csv_bundle(dir: &Path, model: GridModel, interconnect: &[String]) -> Result<Grid> {
    let immutables = load_immutables(dir, model)?;
    let mut grid = Grid::empty(immutables, interconnect.to_vec())
        .context("resolving requested interconnects")?;
    let keep: BTreeSet<String> = grid.interconnects()?;

    for r in read_table::<SubRecord>(dir, "sub.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        let sub = Substation {
            name: r.name,
            interconnect_sub_id: r.interconnect_sub_id,
            lat: r.lat,
            lon: r.lon,
            interconnect: r.interconnect,
        };
        insert_unique(&mut grid.sub, SubId::new(r.sub_id), sub, "sub.csv")?;
    }

    for r in read_table::<BusRecord>(dir, "bus.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        let bus_type = BusType::try_from(safe_f64_to_u8(r.bus_type)?)
            .with_context(|| format!("bus {}", r.bus_id))?;
        let bus = Bus {
            bus_type,
            pd: r.pd,
            qd: r.qd,
            gs: r.gs,
            bs: r.bs,
            zone_id: ZoneId::new(r.zone_id),
            vm: r.vm,
            va: r.va,
            base_kv: r.base_kv,
            loss_zone: crate::conversions::safe_f64_to_usize(r.loss_zone)?,
            vmax: r.vmax,
            vmin: r.vmin,
            lat: 0.0,
            lon: 0.0,
            interconnect: r.interconnect,
        };
        insert_unique(&mut grid.bus, BusId::new(r.bus_id), bus, "bus.csv")?;
    }

    for r in read_table::<Bus2SubRecord>(dir, "bus2sub.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        let entry = BusToSub {
            sub_id: SubId::new(r.sub_id),
            interconnect: r.interconnect,
        };
        insert_unique(&mut grid.bus2sub, BusId::new(r.bus_id), entry, "bus2sub.csv")?;
    }

    for r in read_table::<BranchRecord>(dir, "branch.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        let branch = Branch {
            from_bus_id: BusId::new(r.from_bus_id),
            to_bus_id: BusId::new(r.to_bus_id),
            r: r.r,
            x: r.x,
            b: r.b,
            rate_a: r.rate_a,
            rate_b: r.rate_b,
            rate_c: r.rate_c,
            ratio: r.ratio,
            angle: r.angle,
            status: status_flag(r.status)?,
            angmin: r.angmin,
            angmax: r.angmax,
            branch_device_type: r
                .branch_device_type
                .parse::<BranchDeviceType>()
                .with_context(|| format!("branch {}", r.branch_id))?,
            from_zone_id: ZoneId::new(0),
            to_zone_id: ZoneId::new(0),
            from_zone_name: String::new(),
            to_zone_name: String::new(),
            from_lat: 0.0,
            from_lon: 0.0,
            to_lat: 0.0,
            to_lon: 0.0,
            interconnect: r.interconnect,
        };
        insert_unique(&mut grid.branch, BranchId::new(r.branch_id), branch, "branch.csv")?;
    }

    for r in read_table::<DcLineRecord>(dir, "dcline.csv")? {
        if !keep.contains(&r.from_interconnect) || !keep.contains(&r.to_interconnect) {
            continue;
        }
        let dcline = DcLine {
            from_bus_id: BusId::new(r.from_bus_id),
            to_bus_id: BusId::new(r.to_bus_id),
            status: status_flag(r.status)?,
            pf: r.pf,
            pt: r.pt,
            qf: r.qf,
            qt: r.qt,
            vf: r.vf,
            vt: r.vt,
            pmin: r.pmin,
            pmax: r.pmax,
            qmin_f: r.qmin_f,
            qmax_f: r.qmax_f,
            qmin_t: r.qmin_t,
            qmax_t: r.qmax_t,
            loss0: r.loss0,
            loss1: r.loss1,
            from_interconnect: r.from_interconnect,
            to_interconnect: r.to_interconnect,
        };
        insert_unique(&mut grid.dcline, DcLineId::new(r.dcline_id), dcline, "dcline.csv")?;
    }

    for r in read_table::<PlantRecord>(dir, "plant.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        if !grid.resources().contains(&r.kind) {
            return Err(GridError::invalid(format!(
                "plant {} has type '{}' outside the {} resource set",
                r.plant_id, r.kind, model
            ))
            .into());
        }
        let plant = Plant {
            bus_id: BusId::new(r.bus_id),
            pg: r.pg,
            qg: r.qg,
            qmax: r.qmax,
            qmin: r.qmin,
            vg: r.vg,
            mbase: r.mbase,
            status: status_flag(r.status)?,
            pmax: r.pmax,
            pmin: r.pmin,
            ramp_10: r.ramp_10,
            ramp_30: r.ramp_30,
            kind: r.kind,
            gen_fuel_cost: r.gen_fuel_cost,
            gen_iob: r.gen_iob,
            gen_ioc: r.gen_ioc,
            gen_iod: r.gen_iod,
            zone_id: ZoneId::new(0),
            zone_name: String::new(),
            lat: 0.0,
            lon: 0.0,
            interconnect: r.interconnect,
        };
        insert_unique(&mut grid.plant, PlantId::new(r.plant_id), plant, "plant.csv")?;
    }

    for r in read_table::<GenCostRecord>(dir, "gencost.csv")? {
        if !keep.contains(&r.interconnect) {
            continue;
        }
        let model_code = CostModel::try_from(safe_f64_to_u8(r.model)?)?;
        if model_code != CostModel::Polynomial || r.n != 3.0 {
            return Err(GridError::MalformedGencost(format!(
                "gencost.csv row for plant {} is not a quadratic polynomial",
                r.plant_id
            ))
            .into());
        }
        let mut cost = GenCost::quadratic(r.c2, r.c1, r.c0, &r.interconnect);
        cost.startup = r.startup;
        cost.shutdown = r.shutdown;
        insert_unique(
            &mut grid.gencost.before,
            PlantId::new(r.plant_id),
            cost,
            "gencost.csv",
        )?;
    }
    grid.gencost.after = grid.gencost.before.clone();

    grid.recompute_zone_mappings()?;
    grid.populate_derived_columns();
    check_grid(&grid).with_context(|| format!("validating grid from {}", dir.display()))?;

    info!(
        dir = %dir.display(),
        interconnect = ?grid.interconnect,
        buses = grid.bus.len(),
        branches = grid.branch.len(),
        plants = grid.plant.len(),
        "loaded CSV grid bundle"
    );
    Ok(grid)
}

/// Write a grid as a CSV bundle. The linearized gencost and storage are
/// not part of the bundle.
pub fn write_csv_bundle(grid: &Grid, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating bundle directory {}", dir.display()))?;

    write_zone_table(grid, dir)?;
    write_table(
        dir,
        "sub.csv",
        grid.sub.iter().map(|(id, s)| SubRecord {
            sub_id: id.value(),
            name: s.name.clone(),
            interconnect_sub_id: s.interconnect_sub_id,
            lat: s.lat,
            lon: s.lon,
            interconnect: s.interconnect.clone(),
        }),
    )?;
    write_table(
        dir,
        "bus.csv",
        grid.bus.iter().map(|(id, b)| BusRecord {
            bus_id: id.value(),
            bus_type: f64::from(u8::from(b.bus_type)),
            pd: b.pd,
            qd: b.qd,
            gs: b.gs,
            bs: b.bs,
            zone_id: b.zone_id.value(),
            vm: b.vm,
            va: b.va,
            base_kv: b.base_kv,
            loss_zone: b.loss_zone as f64,
            vmax: b.vmax,
            vmin: b.vmin,
            interconnect: b.interconnect.clone(),
        }),
    )?;
    write_table(
        dir,
        "bus2sub.csv",
        grid.bus2sub.iter().map(|(id, b)| Bus2SubRecord {
            bus_id: id.value(),
            sub_id: b.sub_id.value(),
            interconnect: b.interconnect.clone(),
        }),
    )?;
    write_table(
        dir,
        "branch.csv",
        grid.branch.iter().map(|(id, b)| BranchRecord {
            branch_id: id.value(),
            from_bus_id: b.from_bus_id.value(),
            to_bus_id: b.to_bus_id.value(),
            r: b.r,
            x: b.x,
            b: b.b,
            rate_a: b.rate_a,
            rate_b: b.rate_b,
            rate_c: b.rate_c,
            ratio: b.ratio,
            angle: b.angle,
            status: f64::from(b.status),
            angmin: b.angmin,
            angmax: b.angmax,
            branch_device_type: format!("{:?}", b.branch_device_type),
            interconnect: b.interconnect.clone(),
        }),
    )?;
    write_table(
        dir,
        "dcline.csv",
        grid.dcline.iter().map(|(id, d)| DcLineRecord {
            dcline_id: id.value(),
            from_bus_id: d.from_bus_id.value(),
            to_bus_id: d.to_bus_id.value(),
            status: f64::from(d.status),
            pf: d.pf,
            pt: d.pt,
            qf: d.qf,
            qt: d.qt,
            vf: d.vf,
            vt: d.vt,
            pmin: d.pmin,
            pmax: d.pmax,
            qmin_f: d.qmin_f,
            qmax_f: d.qmax_f,
            qmin_t: d.qmin_t,
            qmax_t: d.qmax_t,
            loss0: d.loss0,
            loss1: d.loss1,
            from_interconnect: d.from_interconnect.clone(),
            to_interconnect: d.to_interconnect.clone(),
        }),
    )?;
    write_table(
        dir,
        "plant.csv",
        grid.plant.iter().map(|(id, p)| PlantRecord {
            plant_id: id.value(),
            bus_id: p.bus_id.value(),
            pg: p.pg,
            qg: p.qg,
            qmax: p.qmax,
            qmin: p.qmin,
            vg: p.vg,
            mbase: p.mbase,
            status: f64::from(p.status),
            pmax: p.pmax,
            pmin: p.pmin,
            ramp_10: p.ramp_10,
            ramp_30: p.ramp_30,
            kind: p.kind.clone(),
            interconnect: p.interconnect.clone(),
            gen_fuel_cost: p.gen_fuel_cost,
            gen_iob: p.gen_iob,
            gen_ioc: p.gen_ioc,
            gen_iod: p.gen_iod,
        }),
    )?;
    let mut costs = Vec::with_capacity(grid.gencost.before.len());
    for (id, c) in &grid.gencost.before {
        let coefficient = |power| {
            c.coefficient(power).ok_or_else(|| {
                anyhow!("gencost of plant {} is not a quadratic polynomial", id)
            })
        };
        costs.push(GenCostRecord {
            plant_id: id.value(),
            model: f64::from(u8::from(c.model)),
            startup: c.startup,
            shutdown: c.shutdown,
            n: c.n as f64,
            c2: coefficient(2)?,
            c1: coefficient(1)?,
            c0: coefficient(0)?,
            interconnect: c.interconnect.clone(),
        });
    }
    write_table(dir, "gencost.csv", costs)?;

    info!(dir = %dir.display(), "wrote CSV grid bundle");
    Ok(())
}

fn write_zone_table(grid: &Grid, dir: &Path) -> Result<()> {
    let path = dir.join("zone.csv");
    let mut wtr = Writer::from_path(&path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;
    let division = match grid.zone_table().division_kind {
        gridscen_core::immutables::DivisionKind::State => "state",
        gridscen_core::immutables::DivisionKind::Country => "country",
    };
    wtr.write_record(["zone_id", "zone_name", division, "interconnect", "time_zone", "abv"])
        .context("writing CSV header")?;
    for zone in grid.zone_table().zones.values() {
        wtr.write_record([
            zone.zone_id.to_string().as_str(),
            &zone.zone_name,
            &zone.division,
            &zone.interconnect,
            &zone.time_zone,
            &zone.abv,
        ])
        .context("writing CSV record")?;
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::fixtures::sample_grid;
    use tempfile::tempdir;

    #[test]
    fn bundle_round_trip_preserves_grid() {
        let grid = sample_grid().unwrap();
        let dir = tempdir().unwrap();
        write_csv_bundle(&grid, dir.path()).unwrap();
        let loaded = load_csv_bundle(
            dir.path(),
            GridModel::UsaTamu,
            &["Texas".to_string(), "Western".to_string()],
        )
        .unwrap();
        assert_eq!(loaded, grid);
        assert_eq!(loaded.gencost.after, loaded.gencost.before);
    }

    #[test]
    fn interconnect_filter_drops_other_rows() {
        let grid = sample_grid().unwrap();
        let dir = tempdir().unwrap();
        write_csv_bundle(&grid, dir.path()).unwrap();
        let texas = load_csv_bundle(dir.path(), GridModel::UsaTamu, &["Texas".to_string()])
            .unwrap();
        assert_eq!(texas.bus.len(), 4);
        assert!(texas.dcline.is_empty());
        assert!(texas.plant.values().all(|p| p.interconnect == "Texas"));
        assert_eq!(texas.zone2id.len(), 8);
        assert!(!texas.zone2id.contains_key("Nevada"));
    }

    #[test]
    fn missing_table_is_reported() {
        let grid = sample_grid().unwrap();
        let dir = tempdir().unwrap();
        write_csv_bundle(&grid, dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("plant.csv")).unwrap();
        let err = load_csv_bundle(dir.path(), GridModel::UsaTamu, &["Texas".to_string()])
            .unwrap_err();
        let root = err.downcast_ref::<GridError>();
        assert!(matches!(root, Some(GridError::MissingInput(_))), "{err:?}");
    }
}
