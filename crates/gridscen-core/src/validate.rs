//! Cross-table invariant checks.
//!
//! [`validate_grid`] evaluates every rule and returns all violations;
//! [`check_grid`] turns a non-empty error set into
//! [`GridError::Topology`].
//!
//! The `_allowing_detached` variants exempt a set of freshly added buses
//! from the island rules: a bus may be added on its own and wired up by a
//! later change table.

use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::diagnostics::Diagnostics;
use crate::error::{GridError, GridResult};
use crate::grid::Grid;
use crate::ids::BusId;

/// AC-branch graph with one node per bus.
pub fn ac_graph(grid: &Grid) -> (UnGraph<BusId, ()>, BTreeMap<BusId, NodeIndex>) {
    let mut graph = UnGraph::with_capacity(grid.bus.len(), grid.branch.len());
    let index: BTreeMap<BusId, NodeIndex> = grid
        .bus
        .keys()
        .map(|bus_id| (*bus_id, graph.add_node(*bus_id)))
        .collect();
    for branch in grid.branch.values() {
        if let (Some(from), Some(to)) = (index.get(&branch.from_bus_id), index.get(&branch.to_bus_id))
        {
            graph.add_edge(*from, *to, ());
        }
    }
    (graph, index)
}

/// Number of connected components of the AC-branch graph.
pub fn ac_island_count(grid: &Grid) -> usize {
    let (graph, _) = ac_graph(grid);
    connected_components(&graph)
}

/// Evaluate every grid invariant and collect the violations.
pub fn validate_grid(grid: &Grid) -> Diagnostics {
    validate_grid_allowing_detached(grid, &BTreeSet::new())
}

/// Like [`validate_grid`], but buses in `detached` may have no branch or
/// DC line. Each such bus without an AC branch counts as its own component.
pub fn validate_grid_allowing_detached(grid: &Grid, detached: &BTreeSet<BusId>) -> Diagnostics {
    let mut diag = Diagnostics::new();
    check_references(grid, &mut diag);
    check_islanded_buses(grid, detached, &mut diag);
    check_bus2sub(grid, &mut diag);
    check_branch_interconnects(grid, &mut diag);
    check_transformer_substations(grid, &mut diag);
    check_line_voltages(grid, &mut diag);
    check_gencost_index(grid, &mut diag);
    check_components(grid, detached, &mut diag);
    if diag.has_errors() {
        warn!(summary = %diag.summary(), "grid failed validation");
    } else {
        debug!(buses = grid.bus.len(), "grid passed validation");
    }
    diag
}

/// Validate and fail with every violation when any rule is broken.
pub fn check_grid(grid: &Grid) -> GridResult<()> {
    check_grid_allowing_detached(grid, &BTreeSet::new())
}

pub fn check_grid_allowing_detached(grid: &Grid, detached: &BTreeSet<BusId>) -> GridResult<()> {
    let diag = validate_grid_allowing_detached(grid, detached);
    if diag.has_errors() {
        return Err(GridError::Topology(diag));
    }
    Ok(())
}

fn check_references(grid: &Grid, diag: &mut Diagnostics) {
    for (id, branch) in &grid.branch {
        for (end, bus_id) in [("from", branch.from_bus_id), ("to", branch.to_bus_id)] {
            if !grid.bus.contains_key(&bus_id) {
                diag.add_error_with_entity(
                    "reference",
                    &format!("{end}_bus_id {bus_id} is not a bus"),
                    &format!("Branch {id}"),
                );
            }
        }
    }
    for (id, dcline) in &grid.dcline {
        for (end, bus_id) in [("from", dcline.from_bus_id), ("to", dcline.to_bus_id)] {
            if !grid.bus.contains_key(&bus_id) {
                diag.add_error_with_entity(
                    "reference",
                    &format!("{end}_bus_id {bus_id} is not a bus"),
                    &format!("DC line {id}"),
                );
            }
        }
    }
    for (id, plant) in &grid.plant {
        if !grid.bus.contains_key(&plant.bus_id) {
            diag.add_error_with_entity(
                "reference",
                &format!("bus_id {} is not a bus", plant.bus_id),
                &format!("Plant {id}"),
            );
        }
    }
    for (id, unit) in &grid.storage.gen {
        if !grid.bus.contains_key(&unit.bus_id) {
            diag.add_error_with_entity(
                "reference",
                &format!("bus_id {} is not a bus", unit.bus_id),
                &format!("Storage {id}"),
            );
        }
    }
}

fn check_islanded_buses(grid: &Grid, detached: &BTreeSet<BusId>, diag: &mut Diagnostics) {
    if grid.branch.is_empty() && grid.dcline.is_empty() {
        return;
    }
    let connected: BTreeSet<BusId> = grid
        .branch
        .values()
        .flat_map(|b| [b.from_bus_id, b.to_bus_id])
        .chain(grid.dcline.values().flat_map(|d| [d.from_bus_id, d.to_bus_id]))
        .collect();
    for bus_id in grid.bus.keys() {
        if !connected.contains(bus_id) && !detached.contains(bus_id) {
            diag.add_error_with_entity(
                "island",
                "bus is not connected to any branch or DC line",
                &format!("Bus {bus_id}"),
            );
        }
    }
}

fn check_bus2sub(grid: &Grid, diag: &mut Diagnostics) {
    for bus_id in grid.bus.keys() {
        if !grid.bus2sub.contains_key(bus_id) {
            diag.add_error_with_entity(
                "substation",
                "bus has no bus2sub entry",
                &format!("Bus {bus_id}"),
            );
        }
    }
    for (bus_id, b2s) in &grid.bus2sub {
        if !grid.bus.contains_key(bus_id) {
            diag.add_error_with_entity(
                "substation",
                "bus2sub entry for a bus that does not exist",
                &format!("Bus {bus_id}"),
            );
        }
        if !grid.sub.contains_key(&b2s.sub_id) {
            diag.add_error_with_entity(
                "substation",
                &format!("sub_id {} is not a substation", b2s.sub_id),
                &format!("Bus {bus_id}"),
            );
        }
    }
}

fn check_branch_interconnects(grid: &Grid, diag: &mut Diagnostics) {
    for (id, branch) in &grid.branch {
        let from = grid.bus_interconnect(branch.from_bus_id);
        let to = grid.bus_interconnect(branch.to_bus_id);
        if let (Some(from), Some(to)) = (from, to) {
            if from != to {
                diag.add_error_with_entity(
                    "interconnect",
                    &format!("AC branch crosses interconnects {from} and {to}"),
                    &format!("Branch {id}"),
                );
            }
        }
    }
}

fn check_transformer_substations(grid: &Grid, diag: &mut Diagnostics) {
    for (id, branch) in &grid.branch {
        if !branch.branch_device_type.is_transformer() {
            continue;
        }
        let from = grid.bus2sub.get(&branch.from_bus_id).map(|b| b.sub_id);
        let to = grid.bus2sub.get(&branch.to_bus_id).map(|b| b.sub_id);
        if let (Some(from), Some(to)) = (from, to) {
            if from != to {
                diag.add_error_with_entity(
                    "transformer",
                    &format!("transformer spans substations {from} and {to}"),
                    &format!("Branch {id}"),
                );
            }
        }
    }
}

fn check_line_voltages(grid: &Grid, diag: &mut Diagnostics) {
    for (id, branch) in &grid.branch {
        if branch.branch_device_type.is_transformer() {
            continue;
        }
        let from = grid.bus.get(&branch.from_bus_id).map(|b| b.base_kv);
        let to = grid.bus.get(&branch.to_bus_id).map(|b| b.base_kv);
        if let (Some(from), Some(to)) = (from, to) {
            if from != to {
                diag.add_error_with_entity(
                    "voltage",
                    &format!("line connects {from} kV to {to} kV"),
                    &format!("Branch {id}"),
                );
            }
        }
    }
}

fn check_gencost_index(grid: &Grid, diag: &mut Diagnostics) {
    let plants: BTreeSet<_> = grid.plant.keys().copied().collect();
    for (label, table) in [("before", &grid.gencost.before), ("after", &grid.gencost.after)] {
        let costs: BTreeSet<_> = table.keys().copied().collect();
        for missing in plants.difference(&costs) {
            diag.add_error_with_entity(
                "gencost",
                &format!("plant has no gencost.{label} row"),
                &format!("Plant {missing}"),
            );
        }
        for orphan in costs.difference(&plants) {
            diag.add_error_with_entity(
                "gencost",
                &format!("gencost.{label} row for a plant that does not exist"),
                &format!("Plant {orphan}"),
            );
        }
    }
}

fn check_components(grid: &Grid, detached: &BTreeSet<BusId>, diag: &mut Diagnostics) {
    if grid.branch.is_empty() {
        return;
    }
    let on_ac: BTreeSet<BusId> = grid
        .branch
        .values()
        .flat_map(|b| [b.from_bus_id, b.to_bus_id])
        .collect();
    let singletons = detached
        .iter()
        .filter(|id| grid.bus.contains_key(id) && !on_ac.contains(id))
        .count();
    let expected = match grid.interconnects() {
        Ok(set) => set.len() + singletons,
        Err(err) => {
            diag.add_error("interconnect", &err.to_string());
            return;
        }
    };
    let islands = ac_island_count(grid);
    if islands != expected {
        diag.add_error(
            "island",
            &format!(
                "AC network has {islands} connected component(s) but spans {expected} interconnect(s)"
            ),
        );
    }
}
