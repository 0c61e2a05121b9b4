//! A small `usa_tamu` grid spanning Texas and Western.
//!
//! Texas: buses 1, 2 (zone Far West, substation 1, joined by a transformer)
//! and 3, 4 (zone East). Western: buses 10, 11 (Nevada) and 12 (Arizona).
//! DC line 7 links bus 4 to bus 12.

use std::collections::BTreeMap;

use crate::error::GridResult;
use crate::grid::{
    Branch, BranchDeviceType, Bus, BusToSub, BusType, DcLine, GenCost, Grid, Plant, Substation,
};
use crate::ids::{BranchId, BusId, DcLineId, PlantId, SubId, ZoneId};
use crate::immutables::{GridModel, ModelImmutables};

/// Substation holding bus 10; new buses placed here reuse it.
pub const HOOVER: (f64, f64) = (36.0155, -114.738);

fn substations() -> Vec<(usize, &'static str, f64, f64, &'static str)> {
    vec![
        (1, "MIDLAND", 31.9973, -102.0779, "Texas"),
        (2, "TYLER", 32.3513, -95.3011, "Texas"),
        (3, "LUFKIN", 31.3382, -94.7291, "Texas"),
        (10, "HOOVER", HOOVER.0, HOOVER.1, "Western"),
        (11, "LAS VEGAS", 36.1699, -115.1398, "Western"),
        (12, "PHOENIX", 33.4484, -112.074, "Western"),
    ]
}

fn bus(
    bus_type: BusType,
    pd: f64,
    zone_id: usize,
    base_kv: f64,
    interconnect: &str,
) -> Bus {
    Bus {
        bus_type,
        pd,
        qd: 0.0,
        gs: 0.0,
        bs: 0.0,
        zone_id: ZoneId::new(zone_id),
        vm: 1.0,
        va: 0.0,
        base_kv,
        loss_zone: 1,
        vmax: 1.1,
        vmin: 0.9,
        lat: 0.0,
        lon: 0.0,
        interconnect: interconnect.to_string(),
    }
}

fn branch(from: usize, to: usize, x: f64, rate_a: f64, kind: BranchDeviceType) -> Branch {
    Branch {
        from_bus_id: BusId::new(from),
        to_bus_id: BusId::new(to),
        r: x / 10.0,
        x,
        b: 0.0,
        rate_a,
        rate_b: 0.0,
        rate_c: 0.0,
        ratio: if kind.is_transformer() { 1.0 } else { 0.0 },
        angle: 0.0,
        status: 1,
        angmin: -360.0,
        angmax: 360.0,
        branch_device_type: kind,
        from_zone_id: ZoneId::new(0),
        to_zone_id: ZoneId::new(0),
        from_zone_name: String::new(),
        to_zone_name: String::new(),
        from_lat: 0.0,
        from_lon: 0.0,
        to_lat: 0.0,
        to_lon: 0.0,
        interconnect: String::new(),
    }
}

/// A generator row with the location columns left for
/// [`Grid::populate_derived_columns`].
pub fn plant(kind: &str, bus_id: usize, pmin: f64, pmax: f64) -> Plant {
    Plant {
        bus_id: BusId::new(bus_id),
        pg: pmin,
        qg: 0.0,
        qmax: 0.0,
        qmin: 0.0,
        vg: 1.0,
        mbase: 100.0,
        status: 1,
        pmax,
        pmin,
        ramp_10: pmax,
        ramp_30: pmax,
        kind: kind.to_string(),
        gen_fuel_cost: 0.0,
        gen_iob: 0.0,
        gen_ioc: 0.0,
        gen_iod: 0.0,
        zone_id: ZoneId::new(0),
        zone_name: String::new(),
        lat: 0.0,
        lon: 0.0,
        interconnect: String::new(),
    }
}

/// Build the sample grid. Derived columns are populated.
pub fn sample_grid() -> GridResult<Grid> {
    let immutables = ModelImmutables::builtin(GridModel::UsaTamu)?;
    let mut grid = Grid::empty(immutables, vec!["Texas".into(), "Western".into()])?;

    for (id, name, lat, lon, interconnect) in substations() {
        grid.sub.insert(
            SubId::new(id),
            Substation {
                name: name.to_string(),
                interconnect_sub_id: id,
                lat,
                lon,
                interconnect: interconnect.to_string(),
            },
        );
    }

    let buses = [
        (1, BusType::Slack, 50.0, 301, 345.0, 1, "Texas"),
        (2, BusType::Pv, 30.0, 301, 138.0, 1, "Texas"),
        (3, BusType::Pv, 200.0, 308, 345.0, 2, "Texas"),
        (4, BusType::Pv, 100.0, 308, 345.0, 3, "Texas"),
        (10, BusType::Slack, 0.0, 208, 345.0, 10, "Western"),
        (11, BusType::Pv, 300.0, 208, 345.0, 11, "Western"),
        (12, BusType::Pv, 400.0, 209, 345.0, 12, "Western"),
    ];
    for (id, kind, pd, zone, kv, sub, interconnect) in buses {
        grid.bus
            .insert(BusId::new(id), bus(kind, pd, zone, kv, interconnect));
        grid.bus2sub.insert(
            BusId::new(id),
            BusToSub {
                sub_id: SubId::new(sub),
                interconnect: interconnect.to_string(),
            },
        );
    }

    let branches = [
        (1, 3, 0.04, 1000.0, BranchDeviceType::Line),
        (1, 2, 0.01, 500.0, BranchDeviceType::Transformer),
        (3, 4, 0.006, 800.0, BranchDeviceType::Line),
        (10, 11, 0.003, 1200.0, BranchDeviceType::Line),
        (11, 12, 0.025, 900.0, BranchDeviceType::Line),
        (10, 12, 0.02, 900.0, BranchDeviceType::Line),
    ];
    for (i, (from, to, x, rate_a, kind)) in branches.into_iter().enumerate() {
        grid.branch
            .insert(BranchId::new(i), branch(from, to, x, rate_a, kind));
    }

    grid.dcline.insert(
        DcLineId::new(7),
        DcLine {
            from_bus_id: BusId::new(4),
            to_bus_id: BusId::new(12),
            status: 1,
            pf: 150.0,
            pt: 147.0,
            qf: 0.0,
            qt: 0.0,
            vf: 1.0,
            vt: 1.0,
            pmin: 0.0,
            pmax: 200.0,
            qmin_f: 0.0,
            qmax_f: 0.0,
            qmin_t: 0.0,
            qmax_t: 0.0,
            loss0: 0.0,
            loss1: 0.0,
            from_interconnect: String::new(),
            to_interconnect: String::new(),
        },
    );

    let plants: [(&str, usize, f64, f64, [f64; 3]); 9] = [
        ("solar", 2, 0.0, 100.0, [0.0, 0.0, 0.0]),
        ("coal", 3, 20.0, 100.0, [0.0025, 30.0, 1500.0]),
        ("ng", 4, 50.0, 300.0, [0.004, 25.0, 900.0]),
        ("wind", 1, 0.0, 150.0, [0.0, 0.0, 0.0]),
        ("hydro", 11, 0.0, 80.0, [0.0, 0.0, 0.0]),
        ("ng", 10, 100.0, 400.0, [0.003, 22.0, 1200.0]),
        ("solar", 12, 0.0, 50.0, [0.0, 0.0, 0.0]),
        ("wind", 11, 0.0, 60.0, [0.0, 0.0, 0.0]),
        ("nuclear", 12, 900.0, 1000.0, [0.00001, 8.0, 4000.0]),
    ];
    let mut before = BTreeMap::new();
    for (i, (kind, bus_id, pmin, pmax, [c2, c1, c0])) in plants.into_iter().enumerate() {
        let interconnect = grid
            .bus_interconnect(BusId::new(bus_id))
            .unwrap_or_default()
            .to_string();
        grid.plant
            .insert(PlantId::new(i), plant(kind, bus_id, pmin, pmax));
        before.insert(PlantId::new(i), GenCost::quadratic(c2, c1, c0, &interconnect));
    }
    grid.gencost.after = before.clone();
    grid.gencost.before = before;

    grid.populate_derived_columns();
    Ok(grid)
}
