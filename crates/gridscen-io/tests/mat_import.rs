#![cfg(feature = "mat")]

use gridscen_core::fixtures::sample_grid;
use gridscen_core::{BusId, CostModel, Grid, GridModel, PlantId, StorageId};
use gridscen_io::csv_bundle::write_csv_bundle;
use gridscen_io::mat::{load_mat_grid, MatImportOptions, STORAGE_DATA_COLUMNS};
use libflate::zlib::Encoder;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const MI_INT8: u32 = 1;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_DOUBLE: u32 = 9;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MX_STRUCT_CLASS: u32 = 2;
const MX_DOUBLE_CLASS: u32 = 6;

enum Var {
    /// Rows given row-major
    Matrix(Vec<Vec<f64>>),
    Struct(Vec<(&'static str, Var)>),
}

fn pad8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

fn element(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    pad8(&mut out);
    out
}

fn array_head(class: u32, nrows: usize, ncols: usize, name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    let mut flags = Vec::new();
    flags.extend_from_slice(&class.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    body.extend(element(MI_UINT32, &flags));
    let mut dims = Vec::new();
    dims.extend_from_slice(&(nrows as i32).to_le_bytes());
    dims.extend_from_slice(&(ncols as i32).to_le_bytes());
    body.extend(element(MI_INT32, &dims));
    body.extend(element(MI_INT8, name.as_bytes()));
    body
}

/// A matrix element; struct members pass an empty name.
fn encode_var(name: &str, var: &Var) -> Vec<u8> {
    match var {
        Var::Matrix(rows) => {
            let nrows = rows.len();
            let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
            let mut body = array_head(MX_DOUBLE_CLASS, nrows, ncols, name);
            let mut real = Vec::new();
            for c in 0..ncols {
                for row in rows.iter() {
                    real.extend_from_slice(&row[c].to_le_bytes());
                }
            }
            body.extend(element(MI_DOUBLE, &real));
            element(MI_MATRIX, &body)
        }
        Var::Struct(fields) => {
            let mut body = array_head(MX_STRUCT_CLASS, 1, 1, name);
            let width = fields.iter().map(|(f, _)| f.len() + 1).max().unwrap_or(1);
            body.extend(element(MI_INT32, &(width as i32).to_le_bytes()));
            let mut names = Vec::new();
            for (field, _) in fields {
                let mut slot = field.as_bytes().to_vec();
                slot.resize(width, 0);
                names.extend(slot);
            }
            body.extend(element(MI_INT8, &names));
            for (_, member) in fields {
                body.extend(encode_var("", member));
            }
            element(MI_MATRIX, &body)
        }
    }
}

fn compress(element: &[u8]) -> Vec<u8> {
    let mut encoder = Encoder::new(Vec::new()).unwrap();
    encoder.write_all(element).unwrap();
    let deflated = encoder.finish().into_result().unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
    out.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
    out.extend(deflated);
    out
}

/// Level 5 MAT-file holding `vars`, zlib-compressed when `compressed`.
fn write_mat(path: &Path, vars: &[(&str, Var)], compressed: bool) {
    let mut out = Vec::new();
    let mut text = b"MATLAB 5.0 MAT-file, written by gridscen tests".to_vec();
    text.resize(116, b' ');
    out.extend_from_slice(&text);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&0x0100u16.to_le_bytes());
    out.extend_from_slice(b"IM");

    for (name, var) in vars {
        let encoded = encode_var(name, var);
        if compressed {
            out.extend(compress(&encoded));
        } else {
            out.extend(encoded);
        }
    }
    std::fs::write(path, out).unwrap();
}

fn column(values: impl IntoIterator<Item = f64>) -> Vec<Vec<f64>> {
    values.into_iter().map(|v| vec![v]).collect()
}

/// Case matrices for `grid`, with buses renumbered 1..n and `busid` holding the ids.
fn case_tables(grid: &Grid) -> Vec<(&'static str, Vec<Vec<f64>>)> {
    let number: BTreeMap<BusId, f64> = grid
        .bus
        .keys()
        .enumerate()
        .map(|(i, id)| (*id, (i + 1) as f64))
        .collect();

    let bus = grid
        .bus
        .iter()
        .map(|(id, b)| {
            vec![
                number[id],
                u8::from(b.bus_type) as f64,
                b.pd,
                b.qd,
                b.gs,
                b.bs,
                b.zone_id.value() as f64,
                b.vm,
                b.va,
                b.base_kv,
                b.loss_zone as f64,
                b.vmax,
                b.vmin,
            ]
        })
        .collect();

    let gen_row = |bus_id: BusId, pg, qg, qmax, qmin, vg, mbase, status: u8, pmax, pmin, r10, r30| {
        let mut row = vec![0.0; 21];
        row[0] = number[&bus_id];
        row[1] = pg;
        row[2] = qg;
        row[3] = qmax;
        row[4] = qmin;
        row[5] = vg;
        row[6] = mbase;
        row[7] = status as f64;
        row[8] = pmax;
        row[9] = pmin;
        row[17] = r10;
        row[18] = r30;
        row
    };
    let gen = grid
        .plant
        .values()
        .map(|p| {
            gen_row(
                p.bus_id, p.pg, p.qg, p.qmax, p.qmin, p.vg, p.mbase, p.status, p.pmax, p.pmin,
                p.ramp_10, p.ramp_30,
            )
        })
        .collect();

    // linearized costs: one segment between Pmin and Pmax
    let gencost = grid
        .plant
        .iter()
        .map(|(id, p)| {
            let cost = &grid.gencost.before[id];
            let f = |x: f64| cost.evaluate(x).unwrap();
            vec![1.0, 0.0, 0.0, 2.0, p.pmin, f(p.pmin), p.pmax, f(p.pmax)]
        })
        .collect();

    let branch = grid
        .branch
        .values()
        .map(|b| {
            vec![
                number[&b.from_bus_id],
                number[&b.to_bus_id],
                b.r,
                b.x,
                b.b,
                b.rate_a,
                b.rate_b,
                b.rate_c,
                b.ratio,
                b.angle,
                b.status as f64,
                b.angmin,
                b.angmax,
            ]
        })
        .collect();

    let dcline = grid
        .dcline
        .values()
        .map(|d| {
            vec![
                number[&d.from_bus_id],
                number[&d.to_bus_id],
                d.status as f64,
                d.pf,
                d.pt,
                d.qf,
                d.qt,
                d.vf,
                d.vt,
                d.pmin,
                d.pmax,
                d.qmin_f,
                d.qmax_f,
                d.qmin_t,
                d.qmax_t,
                d.loss0,
                d.loss1,
            ]
        })
        .collect();

    let storage_gen = vec![gen_row(
        BusId::new(12),
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
        100.0,
        1,
        25.0,
        -25.0,
        25.0,
        25.0,
    )];
    let storage_gencost = vec![vec![2.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0]];
    let mut storage_data = vec![0.0; STORAGE_DATA_COLUMNS.len()];
    storage_data[0] = 10.0; // UnitIdx
    storage_data[3] = 50.0; // InitialStorage
    storage_data[8] = 5.0; // MinStorageLevel
    storage_data[9] = 95.0; // MaxStorageLevel
    storage_data[13] = 1.0; // rho

    vec![
        ("bus", bus),
        ("busid", column(grid.bus.keys().map(|id| id.value() as f64))),
        ("gen", gen),
        ("gencost", gencost),
        ("branch", branch),
        ("dcline", dcline),
        ("dclineid", column(grid.dcline.keys().map(|id| id.value() as f64))),
        ("storage_gen", storage_gen),
        ("storage_gencost", storage_gencost),
        ("storage_data", vec![storage_data]),
    ]
}

fn take(tables: &mut Vec<(&'static str, Vec<Vec<f64>>)>, name: &str) -> Vec<Vec<f64>> {
    let at = tables.iter().position(|(n, _)| *n == name).unwrap();
    tables.remove(at).1
}

/// The simulator's `mdi` struct: MATPOWER tables under `mpc`, storage under
/// `Storage` with `StorageData` as a struct of column vectors.
fn mdi_vars(grid: &Grid) -> Vec<(&'static str, Var)> {
    let mut tables = case_tables(grid);
    let storage_gen = take(&mut tables, "storage_gen");
    let storage_gencost = take(&mut tables, "storage_gencost");
    let storage_data = take(&mut tables, "storage_data");
    let data_fields = STORAGE_DATA_COLUMNS
        .iter()
        .enumerate()
        .map(|(c, name)| (*name, Var::Matrix(column(storage_data.iter().map(|r| r[c])))))
        .collect();
    let mpc = tables
        .into_iter()
        .map(|(name, rows)| (name, Var::Matrix(rows)))
        .collect();
    vec![(
        "mdi",
        Var::Struct(vec![
            ("mpc", Var::Struct(mpc)),
            (
                "Storage",
                Var::Struct(vec![
                    ("gen", Var::Matrix(storage_gen)),
                    ("gencost", Var::Matrix(storage_gencost)),
                    ("StorageData", Var::Struct(data_fields)),
                ]),
            ),
        ]),
    )]
}

/// A bare `mpc` struct without storage.
fn mpc_vars(grid: &Grid) -> Vec<(&'static str, Var)> {
    let mpc = case_tables(grid)
        .into_iter()
        .filter(|(name, _)| !name.starts_with("storage_"))
        .map(|(name, rows)| (name, Var::Matrix(rows)))
        .collect();
    vec![("mpc", Var::Struct(mpc))]
}

/// Every table as a top-level matrix.
fn flat_vars(grid: &Grid) -> Vec<(&'static str, Var)> {
    case_tables(grid)
        .into_iter()
        .map(|(name, rows)| (name, Var::Matrix(rows)))
        .collect()
}

fn interconnect() -> Vec<String> {
    vec!["Texas".to_string(), "Western".to_string()]
}

/// CSV bundle of the sample grid plus the MAT-file path next to it.
fn bundle_dir() -> (TempDir, Grid, PathBuf) {
    let reference = sample_grid().unwrap();
    let dir = tempdir().unwrap();
    let bundle = dir.path().join("bundle");
    write_csv_bundle(&reference, &bundle).unwrap();
    let path = dir.path().join("case.mat");
    (dir, reference, path)
}

fn load(path: &Path, dir: &TempDir, options: MatImportOptions) -> anyhow::Result<Grid> {
    load_mat_grid(
        path,
        &dir.path().join("bundle"),
        GridModel::UsaTamu,
        &interconnect(),
        options,
    )
}

fn assert_network_matches(grid: &Grid, reference: &Grid) {
    assert_eq!(grid.bus, reference.bus);
    assert_eq!(grid.branch, reference.branch);
    assert_eq!(grid.dcline, reference.dcline);
    assert_eq!(grid.plant, reference.plant);
    assert_eq!(grid.gencost.before, reference.gencost.before);
    assert_eq!(grid.sub, reference.sub);
}

#[test]
fn mdi_case_round_trips_against_bundle() {
    let (dir, reference, path) = bundle_dir();
    write_mat(&path, &mdi_vars(&reference), false);

    let grid = load(&path, &dir, MatImportOptions::default()).unwrap();
    assert_network_matches(&grid, &reference);

    let coal = &grid.gencost.after[&PlantId::new(1)];
    assert_eq!(coal.model, CostModel::Piecewise);
    let points = coal.points();
    assert_eq!(points.len(), 2);
    assert_eq!((points[0].0, points[1].0), (20.0, 100.0));
    assert!((points[0].1 - 2101.0).abs() < 1e-9);
    assert!((points[1].1 - 4525.0).abs() < 1e-9);

    assert_eq!(grid.storage.len(), 1);
    let unit = &grid.storage.gen[&StorageId::new(0)];
    assert_eq!(unit.bus_id, BusId::new(12));
    assert_eq!(unit.pmin, -25.0);
    let data = &grid.storage.storage_data[&StorageId::new(0)];
    assert_eq!(data.unit_idx, 10);
    assert_eq!(data.initial_storage, 50.0);
    assert_eq!(data.max_storage_level, 95.0);
    assert_eq!(grid.storage.genfuel, vec!["ess".to_string()]);
}

#[test]
fn compressed_mpc_struct_is_read() {
    let (dir, reference, path) = bundle_dir();
    write_mat(&path, &mpc_vars(&reference), true);

    let grid = load(&path, &dir, MatImportOptions::default()).unwrap();
    assert_network_matches(&grid, &reference);
    assert_eq!(grid.storage.len(), 0);
}

#[test]
fn flat_layout_is_still_read() {
    let (dir, reference, path) = bundle_dir();
    write_mat(&path, &flat_vars(&reference), false);

    let grid = load(&path, &dir, MatImportOptions::default()).unwrap();
    assert_network_matches(&grid, &reference);
    assert_eq!(grid.storage.len(), 1);
}

#[test]
fn without_reindexing_bus_numbers_must_exist_in_bundle() {
    let (dir, reference, path) = bundle_dir();
    write_mat(&path, &mdi_vars(&reference), false);

    let options = MatImportOptions {
        reindex_buses: false,
    };
    assert!(load(&path, &dir, options).is_err());
}

#[test]
fn missing_bus_matrix_is_reported() {
    let (dir, reference, path) = bundle_dir();
    let mpc = case_tables(&reference)
        .into_iter()
        .filter(|(name, _)| *name != "bus")
        .map(|(name, rows)| (name, Var::Matrix(rows)))
        .collect();
    write_mat(&path, &[("mpc", Var::Struct(mpc))], false);

    let err = load(&path, &dir, MatImportOptions::default()).unwrap_err();
    assert!(format!("{err:#}").contains("bus matrix"), "{err:#}");
}

#[test]
fn missing_bundle_is_reported() {
    let (dir, reference, path) = bundle_dir();
    write_mat(&path, &mdi_vars(&reference), false);

    let err = load_mat_grid(
        &path,
        &dir.path().join("elsewhere"),
        GridModel::UsaTamu,
        &interconnect(),
        MatImportOptions::default(),
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("categorical data"), "{err:#}");
}
