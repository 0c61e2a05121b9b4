//! Grid transformer: applies a change table to a grid.
//!
//! Stages run in a fixed order so that the declaration order of keys never
//! matters:
//!
//! 1. zone scaling of capacity (thermal cost curves follow)
//! 2. zone scaling of cost
//! 3. zone scaling of Pmin
//! 4. zone scaling of branch capacity
//! 5. new buses
//! 6. new branches
//! 7. new DC lines
//! 8. new plants
//! 9. new storage
//! 10. id scaling of plants and branches (may touch new elements)
//! 11. id scaling of DC lines
//! 12. removals
//!
//! The input grid is never modified; the result is validated before it is
//! returned. Buses added by the table may stay unconnected.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use gridscen_core::geo::haversine;
use gridscen_core::{
    check_grid_allowing_detached, next_id, Branch, BranchDeviceType, BranchId, Bus, BusId,
    BusToSub, BusType, CostModel, DcLine, DcLineId, GenCost, Grid, GridError, GridResult, Plant,
    PlantId, StorageData, StorageGen, StorageId, SubId, Substation, ZoneId,
};

use crate::change_table::{ChangeTable, NewBranch, NewBus, NewDcLine, NewPlant, NewStorage};

/// Fraction of a new DC line's rating assumed to arrive at the far end.
const DCLINE_DELIVERY: f64 = 0.98;

/// Apply `ct` to a copy of `grid`.
pub fn transform_grid(grid: &Grid, ct: &ChangeTable<'_>) -> GridResult<Grid> {
    let c = ct.changes();
    let mut out = grid.clone();

    for (resource, scaling) in &c.plant_scaling {
        let thermal = out.resources().is_thermal(resource);
        for (zone_id, factor) in &scaling.zone_id {
            for id in plants_in_zone(&out, resource, *zone_id) {
                scale_capacity(&mut out, id, *factor, thermal)?;
            }
        }
    }
    debug!(resources = c.plant_scaling.len(), "stage 1: zone capacity scaling");

    for (resource, scaling) in &c.cost_scaling {
        for (zone_id, factor) in &scaling.zone_id {
            for id in plants_in_zone(&out, resource, *zone_id) {
                scale_cost(&mut out, id, *factor)?;
            }
        }
    }
    debug!(resources = c.cost_scaling.len(), "stage 2: zone cost scaling");

    for (resource, scaling) in &c.pmin_scaling {
        for (zone_id, factor) in &scaling.zone_id {
            for id in plants_in_zone(&out, resource, *zone_id) {
                scale_pmin(&mut out, id, *factor)?;
            }
        }
    }
    debug!(resources = c.pmin_scaling.len(), "stage 3: zone Pmin scaling");

    for (zone_id, factor) in &c.branch.zone_id {
        for id in branches_in_zone(&out, *zone_id) {
            scale_branch(&mut out, id, *factor)?;
        }
    }
    debug!(zones = c.branch.zone_id.len(), "stage 4: zone branch scaling");

    add_buses(&mut out, &c.new_bus)?;
    add_branches(&mut out, &c.new_branch)?;
    add_dclines(&mut out, &c.new_dcline)?;
    add_plants(&mut out, &c.new_plant)?;
    add_storage(&mut out, &c.storage)?;

    for (resource, scaling) in &c.plant_scaling {
        let thermal = out.resources().is_thermal(resource);
        for (id, factor) in &scaling.plant_id {
            scale_capacity(&mut out, *id, *factor, thermal)?;
        }
    }
    for scaling in c.cost_scaling.values() {
        for (id, factor) in &scaling.plant_id {
            scale_cost(&mut out, *id, *factor)?;
        }
    }
    for scaling in c.pmin_scaling.values() {
        for (id, factor) in &scaling.plant_id {
            scale_pmin(&mut out, *id, *factor)?;
        }
    }
    for (id, factor) in &c.branch.branch_id {
        scale_branch(&mut out, *id, *factor)?;
    }
    debug!("stage 10: id scaling");

    for (id, factor) in &c.dcline.dcline_id {
        scale_dcline(&mut out, *id, *factor)?;
    }
    debug!(dclines = c.dcline.dcline_id.len(), "stage 11: DC line scaling");

    remove_elements(
        &mut out,
        &c.remove_branch,
        &c.remove_dcline,
        &c.remove_plant,
        &c.remove_bus,
    );

    out.gencost.after = out.gencost.before.clone();
    out.populate_derived_columns();
    check_grid_allowing_detached(&out, &added_buses(grid, &out))?;
    info!(
        buses = out.bus.len(),
        branches = out.branch.len(),
        dclines = out.dcline.len(),
        plants = out.plant.len(),
        storage = out.storage.len(),
        "grid transformed"
    );
    Ok(out)
}

/// Buses of `transformed` that `base` does not have.
pub fn added_buses(base: &Grid, transformed: &Grid) -> BTreeSet<BusId> {
    transformed
        .bus
        .keys()
        .filter(|id| !base.bus.contains_key(id))
        .copied()
        .collect()
}

fn plants_in_zone(grid: &Grid, resource: &str, zone_id: ZoneId) -> Vec<PlantId> {
    grid.plants_of_type(resource)
        .filter(|(_, p)| grid.bus.get(&p.bus_id).map(|b| b.zone_id) == Some(zone_id))
        .map(|(id, _)| id)
        .collect()
}

/// Branches whose two endpoints lie in `zone_id`.
fn branches_in_zone(grid: &Grid, zone_id: ZoneId) -> Vec<BranchId> {
    let zone_of = |bus_id: &BusId| grid.bus.get(bus_id).map(|b| b.zone_id);
    grid.branch
        .iter()
        .filter(|(_, b)| {
            zone_of(&b.from_bus_id) == Some(zone_id) && zone_of(&b.to_bus_id) == Some(zone_id)
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Scale Pmax and Pmin. For thermal units `c0 * f` and `c2 / f` keep the
/// marginal cost at the scaled operating points.
fn scale_capacity(grid: &mut Grid, id: PlantId, factor: f64, thermal: bool) -> GridResult<()> {
    let plant = grid
        .plant
        .get_mut(&id)
        .ok_or_else(|| GridError::unknown("plant", id))?;
    plant.pmax *= factor;
    plant.pmin *= factor;
    if thermal && factor != 0.0 {
        if let Some(cost) = grid.gencost.before.get_mut(&id) {
            if let Some(c0) = cost.coefficient_mut(0) {
                *c0 *= factor;
            }
            if let Some(c2) = cost.coefficient_mut(2) {
                *c2 /= factor;
            }
        }
    }
    Ok(())
}

fn scale_cost(grid: &mut Grid, id: PlantId, factor: f64) -> GridResult<()> {
    let cost = grid
        .gencost
        .before
        .get_mut(&id)
        .ok_or_else(|| GridError::unknown("plant", id))?;
    match cost.model {
        CostModel::Polynomial => cost.coefficients.iter_mut().for_each(|c| *c *= factor),
        // f values sit at odd positions of `p1, f1, p2, f2, ...`
        CostModel::Piecewise => cost
            .coefficients
            .iter_mut()
            .skip(1)
            .step_by(2)
            .for_each(|f| *f *= factor),
    }
    Ok(())
}

fn scale_pmin(grid: &mut Grid, id: PlantId, factor: f64) -> GridResult<()> {
    let plant = grid
        .plant
        .get_mut(&id)
        .ok_or_else(|| GridError::unknown("plant", id))?;
    plant.pmin *= factor;
    Ok(())
}

fn scale_branch(grid: &mut Grid, id: BranchId, factor: f64) -> GridResult<()> {
    let branch = grid
        .branch
        .get_mut(&id)
        .ok_or_else(|| GridError::unknown("branch", id))?;
    branch.rate_a *= factor;
    // A zero rating leaves the impedance alone.
    if factor > 0.0 {
        branch.x /= factor;
    }
    Ok(())
}

fn scale_dcline(grid: &mut Grid, id: DcLineId, factor: f64) -> GridResult<()> {
    let line = grid
        .dcline
        .get_mut(&id)
        .ok_or_else(|| GridError::unknown("dcline", id))?;
    line.pmin *= factor;
    line.pmax *= factor;
    if factor == 0.0 {
        line.status = 0;
    }
    Ok(())
}

fn add_buses(grid: &mut Grid, buses: &[NewBus]) -> GridResult<()> {
    for new in buses {
        let bus_id = next_id(&grid.bus, BusId::new(1));
        let interconnect = grid
            .zone_table()
            .interconnect_of(new.zone_id)
            .ok_or_else(|| GridError::unknown("zone", new.zone_id))?
            .to_string();

        let existing = grid
            .sub
            .iter()
            .find(|(_, s)| s.lat == new.lat && s.lon == new.lon)
            .map(|(id, _)| *id);
        let sub_id = match existing {
            Some(sub_id) => sub_id,
            None => {
                let sub_id = next_id(&grid.sub, SubId::new(1));
                let interconnect_sub_id = grid
                    .sub
                    .values()
                    .filter(|s| s.interconnect == interconnect)
                    .map(|s| s.interconnect_sub_id)
                    .max()
                    .map_or(1, |max| max + 1);
                grid.sub.insert(
                    sub_id,
                    Substation {
                        name: format!("NEW {sub_id}"),
                        interconnect_sub_id,
                        lat: new.lat,
                        lon: new.lon,
                        interconnect: interconnect.clone(),
                    },
                );
                sub_id
            }
        };

        grid.bus.insert(
            bus_id,
            Bus {
                bus_type: BusType::Pq,
                pd: new.pd,
                qd: 0.0,
                gs: 0.0,
                bs: 0.0,
                zone_id: new.zone_id,
                vm: 1.0,
                va: 0.0,
                base_kv: new.base_kv,
                loss_zone: 1,
                vmax: 1.1,
                vmin: 0.9,
                lat: new.lat,
                lon: new.lon,
                interconnect: interconnect.clone(),
            },
        );
        grid.bus2sub.insert(
            bus_id,
            BusToSub {
                sub_id,
                interconnect,
            },
        );
        debug!(bus = %bus_id, sub = %sub_id, reused = existing.is_some(), "bus added");
    }
    Ok(())
}

fn bus_location(grid: &Grid, bus_id: BusId) -> GridResult<(f64, f64)> {
    grid.bus
        .get(&bus_id)
        .map(|b| (b.lat, b.lon))
        .ok_or_else(|| GridError::unknown("bus", bus_id))
}

/// Mean reactance per mile of existing lines, by voltage level.
fn reactance_per_mile(grid: &Grid) -> BTreeMap<u64, f64> {
    let mut sums: BTreeMap<u64, (f64, usize)> = BTreeMap::new();
    for branch in grid.branch.values() {
        if branch.branch_device_type != BranchDeviceType::Line {
            continue;
        }
        let (Some(from), Some(to)) = (
            grid.bus.get(&branch.from_bus_id),
            grid.bus.get(&branch.to_bus_id),
        ) else {
            continue;
        };
        let distance = haversine((from.lat, from.lon), (to.lat, to.lon));
        if distance > 0.0 {
            let entry = sums.entry(from.base_kv.to_bits()).or_insert((0.0, 0));
            entry.0 += branch.x / distance;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(kv, (sum, count))| (kv, sum / count as f64))
        .collect()
}

fn add_branches(grid: &mut Grid, branches: &[NewBranch]) -> GridResult<()> {
    if branches.is_empty() {
        return Ok(());
    }
    let v2x = reactance_per_mile(grid);
    for new in branches {
        let from = bus_location(grid, new.from_bus_id)?;
        let to = bus_location(grid, new.to_bus_id)?;
        let mut per_mile = Vec::with_capacity(2);
        for bus_id in [new.from_bus_id, new.to_bus_id] {
            let kv = grid.bus.get(&bus_id).map(|b| b.base_kv).unwrap_or_default();
            let x = v2x.get(&kv.to_bits()).ok_or_else(|| {
                GridError::missing(format!(
                    "no existing line at {kv} kV to derive the reactance of a new branch"
                ))
            })?;
            per_mile.push(*x);
        }
        let x = haversine(from, to) * (per_mile[0] + per_mile[1]) / 2.0;

        let branch_id = next_id(&grid.branch, BranchId::new(0));
        grid.branch.insert(
            branch_id,
            Branch {
                from_bus_id: new.from_bus_id,
                to_bus_id: new.to_bus_id,
                r: 0.0,
                x,
                b: 0.0,
                rate_a: new.pmax,
                rate_b: 0.0,
                rate_c: 0.0,
                ratio: 0.0,
                angle: 0.0,
                status: 1,
                angmin: 0.0,
                angmax: 0.0,
                branch_device_type: BranchDeviceType::Line,
                from_zone_id: ZoneId::new(0),
                to_zone_id: ZoneId::new(0),
                from_zone_name: String::new(),
                to_zone_name: String::new(),
                from_lat: from.0,
                from_lon: from.1,
                to_lat: to.0,
                to_lon: to.1,
                interconnect: String::new(),
            },
        );
        debug!(branch = %branch_id, x, "branch added");
    }
    Ok(())
}

fn add_dclines(grid: &mut Grid, dclines: &[NewDcLine]) -> GridResult<()> {
    for new in dclines {
        let from_interconnect = grid
            .bus_interconnect(new.from_bus_id)
            .ok_or_else(|| GridError::unknown("bus", new.from_bus_id))?
            .to_string();
        let to_interconnect = grid
            .bus_interconnect(new.to_bus_id)
            .ok_or_else(|| GridError::unknown("bus", new.to_bus_id))?
            .to_string();
        let dcline_id = next_id(&grid.dcline, DcLineId::new(0));
        grid.dcline.insert(
            dcline_id,
            DcLine {
                from_bus_id: new.from_bus_id,
                to_bus_id: new.to_bus_id,
                status: 1,
                pf: new.pmax,
                pt: DCLINE_DELIVERY * new.pmax,
                qf: 0.0,
                qt: 0.0,
                vf: 1.0,
                vt: 1.0,
                pmin: new.pmin,
                pmax: new.pmax,
                qmin_f: 0.0,
                qmax_f: 0.0,
                qmin_t: 0.0,
                qmax_t: 0.0,
                loss0: 0.0,
                loss1: 0.0,
                from_interconnect,
                to_interconnect,
            },
        );
        debug!(dcline = %dcline_id, pmax = new.pmax, "DC line added");
    }
    Ok(())
}

fn add_plants(grid: &mut Grid, plants: &[NewPlant]) -> GridResult<()> {
    for new in plants {
        let bus = grid
            .bus
            .get(&new.bus_id)
            .ok_or_else(|| GridError::unknown("bus", new.bus_id))?;
        let zone_name = grid.zone_name(bus.zone_id).unwrap_or_default().to_string();
        let plant = Plant {
            bus_id: new.bus_id,
            pg: new.pmin,
            qg: 0.0,
            qmax: 0.0,
            qmin: 0.0,
            vg: 1.0,
            mbase: 100.0,
            status: 1,
            pmax: new.pmax,
            pmin: new.pmin,
            ramp_10: new.pmax,
            ramp_30: new.pmax,
            kind: new.kind.clone(),
            gen_fuel_cost: 0.0,
            gen_iob: 0.0,
            gen_ioc: 0.0,
            gen_iod: 0.0,
            zone_id: bus.zone_id,
            zone_name,
            lat: bus.lat,
            lon: bus.lon,
            interconnect: bus.interconnect.clone(),
        };
        let cost = GenCost::quadratic(new.c2, new.c1, new.c0, &plant.interconnect);
        let plant_id = next_id(&grid.plant, PlantId::new(0));
        grid.plant.insert(plant_id, plant);
        grid.gencost.before.insert(plant_id, cost);
        debug!(plant = %plant_id, kind = %new.kind, pmax = new.pmax, "plant added");
    }
    Ok(())
}

fn add_storage(grid: &mut Grid, units: &[NewStorage]) -> GridResult<()> {
    let defaults = grid.storage.defaults;
    for unit in units {
        let interconnect = grid
            .bus_interconnect(unit.bus_id)
            .ok_or_else(|| GridError::unknown("bus", unit.bus_id))?
            .to_string();
        let params = unit.resolve(&defaults);
        let capacity = unit.capacity;
        let energy = capacity * params.duration;
        let storage_id = next_id(&grid.storage.gen, StorageId::new(0));
        let unit_idx = grid.plant.len() + grid.storage.len() + 1;

        let storage = &mut grid.storage;
        storage.gen.insert(
            storage_id,
            StorageGen {
                bus_id: unit.bus_id,
                pg: 0.0,
                qg: 0.0,
                qmax: 0.0,
                qmin: 0.0,
                vg: 1.0,
                mbase: 100.0,
                status: 1,
                pmax: capacity,
                pmin: -capacity,
                ramp_10: capacity,
                ramp_30: capacity,
            },
        );
        storage
            .gencost
            .insert(storage_id, GenCost::quadratic(0.0, 0.0, 0.0, &interconnect));
        storage.storage_data.insert(
            storage_id,
            StorageData {
                unit_idx,
                initial_storage: energy / 2.0,
                initial_storage_lower_bound: energy / 2.0,
                initial_storage_upper_bound: energy / 2.0,
                initial_storage_cost: params.energy_value,
                terminal_storage_price: params.energy_value,
                min_storage_level: energy * params.min_stor,
                max_storage_level: energy * params.max_stor,
                out_eff: params.out_eff,
                in_eff: params.in_eff,
                loss_factor: params.loss_factor,
                rho: 1.0,
                expected_terminal_storage_max: energy * params.terminal_max,
                expected_terminal_storage_min: energy * params.terminal_min,
            },
        );
        storage.genfuel.push("ess".to_string());
        debug!(storage = %storage_id, capacity, energy, "storage added");
    }
    Ok(())
}

/// Removing an id that is already gone is a no-op.
fn remove_elements(
    grid: &mut Grid,
    branches: &BTreeSet<BranchId>,
    dclines: &BTreeSet<DcLineId>,
    plants: &BTreeSet<PlantId>,
    buses: &BTreeSet<BusId>,
) {
    for id in branches {
        grid.branch.remove(id);
    }
    for id in dclines {
        grid.dcline.remove(id);
    }
    for id in plants {
        grid.plant.remove(id);
        grid.gencost.before.remove(id);
    }
    let mut vacated = BTreeSet::new();
    for id in buses {
        grid.bus.remove(id);
        if let Some(b2s) = grid.bus2sub.remove(id) {
            vacated.insert(b2s.sub_id);
        }
    }
    for sub_id in vacated {
        if !grid.bus2sub.values().any(|b2s| b2s.sub_id == sub_id) {
            grid.sub.remove(&sub_id);
        }
    }
    if !(branches.is_empty() && dclines.is_empty() && plants.is_empty() && buses.is_empty()) {
        debug!(
            branches = branches.len(),
            dclines = dclines.len(),
            plants = plants.len(),
            buses = buses.len(),
            "stage 12: elements removed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::fixtures::sample_grid;

    #[test]
    fn empty_change_table_is_identity() {
        let grid = sample_grid().unwrap();
        let ct = ChangeTable::new(&grid);
        let out = transform_grid(&grid, &ct).unwrap();
        assert_eq!(out, grid);
    }

    #[test]
    fn branch_zone_scaling_touches_internal_branches_only() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_branch_capacity(&[("Nevada", 2.0)], &[]).unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        // 10-11 lies inside Nevada; 11-12 and 10-12 reach Arizona.
        assert_eq!(out.branch[&BranchId::new(3)].rate_a, 2400.0);
        assert_eq!(out.branch[&BranchId::new(3)].x, 0.0015);
        assert_eq!(out.branch[&BranchId::new(4)].rate_a, 900.0);
    }

    #[test]
    fn zero_branch_factor_keeps_reactance() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_branch_capacity(&[], &[(BranchId::new(5), 0.0)])
            .unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        assert_eq!(out.branch[&BranchId::new(5)].rate_a, 0.0);
        assert_eq!(out.branch[&BranchId::new(5)].x, 0.02);
    }

    #[test]
    fn cost_scaling_multiplies_every_coefficient() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_plant_cost("ng", &[("East", 2.0)], &[]).unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        assert_eq!(
            out.gencost.before[&PlantId::new(2)].coefficients,
            vec![0.008, 50.0, 1800.0]
        );
        assert_eq!(out.gencost.after, out.gencost.before);
        // plant 5 is ng in Nevada
        assert_eq!(
            out.gencost.before[&PlantId::new(5)],
            grid.gencost.before[&PlantId::new(5)]
        );
    }

    #[test]
    fn pmin_scaling_multiplies_without_touching_pmax() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.scale_plant_pmin("nuclear", &[], &[(PlantId::new(8), 2.0)])
            .unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        let plant = &out.plant[&PlantId::new(8)];
        assert_eq!(plant.pmin, 1800.0);
        assert_eq!(plant.pmax, 1000.0);
        assert_eq!(out.gencost.before[&PlantId::new(8)], grid.gencost.before[&PlantId::new(8)]);
    }

    #[test]
    fn new_substation_gets_the_next_interconnect_sub_id() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.add_bus(&[NewBus {
            lat: 35.0,
            lon: -113.0,
            zone_id: ZoneId::new(209),
            pd: 10.0,
            base_kv: 345.0,
        }])
        .unwrap();
        ct.add_branch(&[NewBranch {
            from_bus_id: BusId::new(13),
            to_bus_id: BusId::new(12),
            pmax: 300.0,
        }])
        .unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        let sub = &out.sub[&SubId::new(13)];
        assert_eq!(sub.name, "NEW 13");
        assert_eq!(sub.interconnect_sub_id, 13);
        assert_eq!(sub.interconnect, "Western");
        let bus = &out.bus[&BusId::new(13)];
        assert_eq!(bus.bus_type, BusType::Pq);
        assert_eq!(bus.interconnect, "Western");
        let branch = &out.branch[&BranchId::new(6)];
        assert!(branch.x > 0.0);
        assert_eq!(branch.rate_a, 300.0);
    }

    #[test]
    fn lone_new_bus_passes_validation() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.add_bus(&[NewBus {
            lat: 35.0,
            lon: -113.0,
            zone_id: ZoneId::new(209),
            pd: 0.0,
            base_kv: 345.0,
        }])
        .unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        assert_eq!(added_buses(&grid, &out), BTreeSet::from([BusId::new(13)]));
        assert_eq!(out.branch, grid.branch);
    }

    #[test]
    fn new_dcline_and_plant_rows() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.add_dcline(&[NewDcLine::with_capacity(BusId::new(1), BusId::new(10), 500.0)])
            .unwrap();
        let mut plant = NewPlant::new("ng", BusId::new(3), 250.0);
        plant.pmin = 50.0;
        plant.c1 = 20.0;
        ct.add_plant(&[plant]).unwrap();
        let out = transform_grid(&grid, &ct).unwrap();

        let line = &out.dcline[&DcLineId::new(8)];
        assert_eq!((line.pmin, line.pmax), (-500.0, 500.0));
        assert_eq!((line.pf, line.pt), (500.0, 490.0));
        assert_eq!(line.to_interconnect, "Western");

        let plant = &out.plant[&PlantId::new(9)];
        assert_eq!(plant.pg, 50.0);
        assert_eq!(plant.zone_name, "East");
        assert_eq!(out.gencost.before[&PlantId::new(9)].coefficients, vec![0.0, 20.0, 0.0]);
    }

    #[test]
    fn storage_materializes_linked_rows() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        let mut unit = NewStorage::new(BusId::new(3), 100.0);
        unit.duration = Some(2.0);
        ct.add_storage_capacity(&[unit]).unwrap();
        let out = transform_grid(&grid, &ct).unwrap();

        let id = StorageId::new(0);
        let gen = &out.storage.gen[&id];
        assert_eq!((gen.pmin, gen.pmax), (-100.0, 100.0));
        let data = &out.storage.storage_data[&id];
        assert_eq!(data.unit_idx, 10);
        assert_eq!(data.initial_storage, 100.0);
        assert!((data.min_storage_level - 10.0).abs() < 1e-9);
        assert!((data.max_storage_level - 190.0).abs() < 1e-9);
        assert_eq!(data.expected_terminal_storage_max, 200.0);
        assert_eq!(data.initial_storage_cost, 20.0);
        assert_eq!(out.storage.genfuel, vec!["ess".to_string()]);
        assert!(out.storage.gencost[&id].is_quadratic());
    }

    #[test]
    fn bus_removal_drops_orphaned_substation() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.remove_branch(&[BranchId::new(2)]).unwrap();
        ct.remove_plant(&[PlantId::new(2)]).unwrap();
        ct.remove_dcline(&[DcLineId::new(7)]).unwrap();
        ct.remove_bus(&[BusId::new(4)]).unwrap();
        let out = transform_grid(&grid, &ct).unwrap();
        assert!(!out.bus.contains_key(&BusId::new(4)));
        assert!(!out.bus2sub.contains_key(&BusId::new(4)));
        assert!(!out.sub.contains_key(&SubId::new(3)));
        assert!(!out.gencost.before.contains_key(&PlantId::new(2)));
        assert!(out.sub.contains_key(&SubId::new(1)));
    }

    #[test]
    fn disconnecting_removal_fails_validation() {
        let grid = sample_grid().unwrap();
        let mut ct = ChangeTable::new(&grid);
        ct.remove_branch(&[BranchId::new(3), BranchId::new(5)])
            .unwrap();
        assert!(matches!(
            transform_grid(&grid, &ct),
            Err(GridError::Topology(_))
        ));
    }
}
