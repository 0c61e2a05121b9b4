//! Simulator-ready derivation of a transformed grid: Pmin policy, the
//! `ramp_30` heuristic and piecewise-linear cost curves.

use std::collections::BTreeMap;
use tracing::{debug, info};

use gridscen_core::{CostModel, GenCost, Grid, GridError, GridResult};

/// `(Pmax breakpoints, normalized ramp at those breakpoints)`.
type RampCurve = ((f64, f64), (f64, f64));

fn ramp_curve(kind: &str) -> Option<RampCurve> {
    match kind {
        "coal" => Some(((200.0, 1400.0), (0.40, 0.15))),
        "dfo" => Some(((200.0, 1200.0), (0.50, 0.20))),
        "ng" => Some(((200.0, 600.0), (0.50, 0.20))),
        _ => None,
    }
}

/// 30-minute ramp of a unit of `kind` rated `pmax`; unlimited for fuels
/// without a curve.
pub fn ramp_30(kind: &str, pmax: f64) -> f64 {
    let ((p_lo, p_hi), (r_lo, r_hi)) = match ramp_curve(kind) {
        Some(curve) => curve,
        None => return f64::INFINITY,
    };
    let norm = if pmax <= p_lo {
        r_lo
    } else if pmax >= p_hi {
        r_hi
    } else {
        r_lo + (r_hi - r_lo) * (pmax - p_lo) / (p_hi - p_lo)
    };
    norm * pmax
}

/// Tabulate a quadratic cost at `segments + 1` equally spaced points of
/// `[pmin, pmax]`. A unit with `pmin == pmax` gets a constant polynomial.
pub fn linearize(cost: &GenCost, pmin: f64, pmax: f64, segments: usize) -> GridResult<GenCost> {
    if segments < 1 {
        return Err(GridError::invalid("number of segments must be at least 1"));
    }
    if !cost.is_quadratic() {
        return Err(GridError::MalformedGencost(format!(
            "only quadratic polynomial costs can be linearized, got type {} with n={}",
            u8::from(cost.model),
            cost.n
        )));
    }
    let f = |p: f64| cost.evaluate(p).unwrap_or_default();

    let mut out = if pmin == pmax {
        GenCost::quadratic(0.0, 0.0, f(pmax), &cost.interconnect)
    } else {
        let step = (pmax - pmin) / segments as f64;
        let points: Vec<(f64, f64)> = (0..=segments)
            .map(|i| {
                let p = if i == segments { pmax } else { pmin + step * i as f64 };
                (p, f(p))
            })
            .collect();
        GenCost::piecewise(&points, &cost.interconnect)
    };
    out.startup = cost.startup;
    out.shutdown = cost.shutdown;
    Ok(out)
}

/// Apply the per-resource Pmin share, then zero Pmin for profile-tracked
/// and out-of-service units.
pub fn adjust_pmin(grid: &mut Grid) {
    let immutables = grid.immutables_arc();
    let resources = &immutables.resources;
    let mut adjusted = 0usize;
    for plant in grid.plant.values_mut() {
        let before = plant.pmin;
        if let Some(share) = resources.pmin_as_share_of_pmax(&plant.kind) {
            plant.pmin = plant.pmax * share;
        }
        if resources.is_profile_resource(&plant.kind) || plant.status == 0 {
            plant.pmin = 0.0;
        }
        if plant.pmin != before {
            adjusted += 1;
        }
    }
    debug!(adjusted, "Pmin adjusted");
}

pub fn set_ramp_30(grid: &mut Grid) {
    for plant in grid.plant.values_mut() {
        plant.ramp_30 = ramp_30(&plant.kind, plant.pmax);
    }
}

/// Fill `gencost.after` with linearized `gencost.before`. Nothing is
/// written unless every row converts.
pub fn linearize_gencost(grid: &mut Grid, segments: usize) -> GridResult<()> {
    let mut after = BTreeMap::new();
    for (id, cost) in &grid.gencost.before {
        let plant = grid
            .plant
            .get(id)
            .ok_or_else(|| GridError::unknown("plant", id))?;
        let row = linearize(cost, plant.pmin, plant.pmax, segments).map_err(|e| match e {
            GridError::MalformedGencost(msg) => {
                GridError::MalformedGencost(format!("plant {id}: {msg}"))
            }
            other => other,
        })?;
        after.insert(*id, row);
    }
    let piecewise = after
        .values()
        .filter(|c| c.model == CostModel::Piecewise)
        .count();
    grid.gencost.after = after;
    debug!(segments, piecewise, "gencost linearized");
    Ok(())
}

/// A simulator-ready copy of `grid`.
pub fn configure_grid(grid: &Grid, segments: usize) -> GridResult<Grid> {
    let mut out = grid.clone();
    adjust_pmin(&mut out);
    set_ramp_30(&mut out);
    linearize_gencost(&mut out, segments)?;
    info!(plants = out.plant.len(), segments, "grid configured");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::fixtures::{plant, sample_grid};
    use gridscen_core::PlantId;

    #[test]
    fn two_segment_linearization() {
        let cost = GenCost::quadratic(1.0, 4.0, 7.0, "Texas");
        let out = linearize(&cost, 20.0, 50.0, 2).unwrap();
        assert_eq!(out.model, CostModel::Piecewise);
        assert_eq!(out.n, 3);
        assert_eq!(
            out.points(),
            vec![(20.0, 487.0), (35.0, 1372.0), (50.0, 2707.0)]
        );
    }

    #[test]
    fn fixed_output_unit_gets_constant_cost() {
        let cost = GenCost::quadratic(1.0, 4.0, 7.0, "Texas");
        let out = linearize(&cost, 50.0, 50.0, 3).unwrap();
        assert!(out.is_quadratic());
        assert_eq!(out.coefficients, vec![0.0, 0.0, 2707.0]);
    }

    #[test]
    fn only_quadratics_are_linearized() {
        let cost = GenCost::piecewise(&[(0.0, 0.0), (10.0, 100.0)], "Texas");
        assert!(matches!(
            linearize(&cost, 0.0, 10.0, 1),
            Err(GridError::MalformedGencost(_))
        ));
        let quadratic = GenCost::quadratic(1.0, 1.0, 1.0, "Texas");
        assert!(matches!(
            linearize(&quadratic, 0.0, 10.0, 0),
            Err(GridError::InvalidArgument(_))
        ));
    }

    #[test]
    fn malformed_row_leaves_gencost_untouched() {
        let mut grid = sample_grid().unwrap();
        grid.gencost.before.insert(
            PlantId::new(3),
            GenCost::piecewise(&[(0.0, 0.0), (150.0, 0.0)], "Texas"),
        );
        let before_after = grid.gencost.after.clone();
        assert!(linearize_gencost(&mut grid, 2).is_err());
        assert_eq!(grid.gencost.after, before_after);
    }

    #[test]
    fn ramp_curve_interpolates_and_clamps() {
        assert_eq!(ramp_30("coal", 100.0), 40.0);
        assert!((ramp_30("coal", 800.0) - 0.275 * 800.0).abs() < 1e-9);
        assert!((ramp_30("ng", 2000.0) - 400.0).abs() < 1e-9);
        assert!((ramp_30("ng", 300.0) - 127.5).abs() < 1e-9);
        assert!(ramp_30("hydro", 80.0).is_infinite());
    }

    #[test]
    fn pmin_policy() {
        let mut grid = sample_grid().unwrap();
        grid.plant.get_mut(&PlantId::new(2)).unwrap().status = 0;
        grid.plant
            .insert(PlantId::new(9), plant("solar", 3, 10.0, 40.0));
        grid.gencost.before.insert(
            PlantId::new(9),
            GenCost::quadratic(0.0, 0.0, 0.0, "Texas"),
        );
        let out = configure_grid(&grid, 1).unwrap();
        assert_eq!(out.plant[&PlantId::new(8)].pmin, 950.0);
        assert_eq!(out.plant[&PlantId::new(9)].pmin, 0.0);
        assert_eq!(out.plant[&PlantId::new(2)].pmin, 0.0);
        assert_eq!(out.plant[&PlantId::new(1)].pmin, 20.0);
        assert_eq!(out.gencost.after[&PlantId::new(1)].n, 2);
        // the input grid is left alone
        assert_eq!(grid.plant[&PlantId::new(8)].pmin, 900.0);
    }
}
