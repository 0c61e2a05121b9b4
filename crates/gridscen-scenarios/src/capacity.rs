//! Clean-energy capacity planning between simulation rounds.
//!
//! Each area has a clean-energy target. The shortfall left by the previous
//! round is turned into new solar and wind capacity using the capacity
//! factors observed in that round. [`Independent`] plans each area alone;
//! [`Collaborative`] pools shortfall and capacity over the participating
//! areas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use gridscen_core::{GridError, GridResult};

/// Previous-round results and the target of one area. Energies are in MWh
/// over the simulated horizon, capacities in MW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityTarget {
    pub area: String,
    /// Share of demand to be met by clean energy
    pub target_fraction: f64,
    pub demand: f64,
    pub prev_clean_generation: f64,
    /// Clean energy credited from outside the area
    #[serde(default)]
    pub external_clean_generation: f64,
    pub prev_solar_capacity: f64,
    pub prev_wind_capacity: f64,
    pub prev_solar_generation: f64,
    pub prev_wind_generation: f64,
    #[serde(default = "default_participating")]
    pub participating: bool,
}

fn default_participating() -> bool {
    true
}

impl CapacityTarget {
    pub fn target_energy(&self) -> f64 {
        self.target_fraction * self.demand
    }

    /// Clean energy still missing; never negative.
    pub fn shortfall(&self) -> f64 {
        (self.target_energy() - self.prev_clean_generation - self.external_clean_generation)
            .max(0.0)
    }

    fn validate(&self) -> GridResult<()> {
        if !(0.0..=1.0).contains(&self.target_fraction) {
            return Err(GridError::invalid(format!(
                "target fraction of {} must be within [0, 1], got {}",
                self.area, self.target_fraction
            )));
        }
        let values = [
            self.demand,
            self.prev_clean_generation,
            self.external_clean_generation,
            self.prev_solar_capacity,
            self.prev_wind_capacity,
            self.prev_solar_generation,
            self.prev_wind_generation,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(GridError::invalid(format!(
                "energies and capacities of {} must be non-negative",
                self.area
            )));
        }
        Ok(())
    }
}

/// Capacity to add in one area and the resulting totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityPlan {
    pub solar_added: f64,
    pub wind_added: f64,
    pub next_solar_capacity: f64,
    pub next_wind_capacity: f64,
}

impl CapacityPlan {
    fn unchanged(target: &CapacityTarget) -> Self {
        Self {
            solar_added: 0.0,
            wind_added: 0.0,
            next_solar_capacity: target.prev_solar_capacity,
            next_wind_capacity: target.prev_wind_capacity,
        }
    }

    fn with_additions(target: &CapacityTarget, solar_added: f64, wind_added: f64) -> Self {
        Self {
            solar_added,
            wind_added,
            next_solar_capacity: target.prev_solar_capacity + solar_added,
            next_wind_capacity: target.prev_wind_capacity + wind_added,
        }
    }
}

/// Plans keyed by area.
pub type CapacityTable = BTreeMap<String, CapacityPlan>;

pub trait CapacityStrategy {
    /// Capacities for the next round. `sim_hours` is the length of the
    /// horizon the previous generation was measured over. Without
    /// `solar_fraction` new energy is split like the previous solar/wind
    /// generation.
    fn next_capacities(
        &self,
        targets: &[CapacityTarget],
        sim_hours: f64,
        solar_fraction: Option<f64>,
    ) -> GridResult<CapacityTable>;
}

fn check_inputs(targets: &[CapacityTarget], sim_hours: f64, solar_fraction: Option<f64>) -> GridResult<()> {
    if !sim_hours.is_finite() || sim_hours <= 0.0 {
        return Err(GridError::invalid(format!(
            "simulation hours must be positive, got {sim_hours}"
        )));
    }
    if let Some(fraction) = solar_fraction {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(GridError::invalid(format!(
                "solar fraction must be within [0, 1], got {fraction}"
            )));
        }
    }
    targets.iter().try_for_each(CapacityTarget::validate)
}

fn split_fraction(solar_fraction: Option<f64>, solar_generation: f64, wind_generation: f64) -> f64 {
    solar_fraction.unwrap_or_else(|| {
        let total = solar_generation + wind_generation;
        if total > 0.0 {
            solar_generation / total
        } else {
            0.5
        }
    })
}

/// MW needed to produce `energy` at the capacity factor observed on
/// `capacity` MW that generated `generation` MWh.
fn capacity_for(energy: f64, capacity: f64, generation: f64, sim_hours: f64, what: &str) -> GridResult<f64> {
    if energy <= 0.0 {
        return Ok(0.0);
    }
    let factor = if capacity > 0.0 {
        generation / (capacity * sim_hours)
    } else {
        0.0
    };
    if factor <= 0.0 {
        return Err(GridError::invalid(format!(
            "no {what} capacity factor can be inferred from the previous round"
        )));
    }
    Ok(energy / (factor * sim_hours))
}

/// Each participating area closes its own shortfall.
#[derive(Debug, Clone, Copy, Default)]
pub struct Independent;

impl CapacityStrategy for Independent {
    fn next_capacities(
        &self,
        targets: &[CapacityTarget],
        sim_hours: f64,
        solar_fraction: Option<f64>,
    ) -> GridResult<CapacityTable> {
        check_inputs(targets, sim_hours, solar_fraction)?;
        let mut table = CapacityTable::new();
        for target in targets {
            if !target.participating {
                table.insert(target.area.clone(), CapacityPlan::unchanged(target));
                continue;
            }
            let shortfall = target.shortfall();
            let fraction = split_fraction(
                solar_fraction,
                target.prev_solar_generation,
                target.prev_wind_generation,
            );
            let solar = capacity_for(
                shortfall * fraction,
                target.prev_solar_capacity,
                target.prev_solar_generation,
                sim_hours,
                "solar",
            )?;
            let wind = capacity_for(
                shortfall * (1.0 - fraction),
                target.prev_wind_capacity,
                target.prev_wind_generation,
                sim_hours,
                "wind",
            )?;
            debug!(area = %target.area, shortfall, solar, wind, "independent plan");
            table.insert(
                target.area.clone(),
                CapacityPlan::with_additions(target, solar, wind),
            );
        }
        Ok(table)
    }
}

/// Areas pool their targets; new capacity is shared out in proportion to
/// each area's existing capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Collaborative {
    /// Count non-participating areas in the pool as well
    pub include_non_participating: bool,
}

impl CapacityStrategy for Collaborative {
    fn next_capacities(
        &self,
        targets: &[CapacityTarget],
        sim_hours: f64,
        solar_fraction: Option<f64>,
    ) -> GridResult<CapacityTable> {
        check_inputs(targets, sim_hours, solar_fraction)?;
        let pooled: Vec<&CapacityTarget> = targets
            .iter()
            .filter(|t| t.participating || self.include_non_participating)
            .collect();

        let sum = |f: fn(&CapacityTarget) -> f64| pooled.iter().map(|t| f(t)).sum::<f64>();
        let shortfall = (sum(CapacityTarget::target_energy)
            - sum(|t| t.prev_clean_generation)
            - sum(|t| t.external_clean_generation))
        .max(0.0);
        let solar_capacity = sum(|t| t.prev_solar_capacity);
        let wind_capacity = sum(|t| t.prev_wind_capacity);
        let solar_generation = sum(|t| t.prev_solar_generation);
        let wind_generation = sum(|t| t.prev_wind_generation);

        let fraction = split_fraction(solar_fraction, solar_generation, wind_generation);
        let solar_total = capacity_for(
            shortfall * fraction,
            solar_capacity,
            solar_generation,
            sim_hours,
            "solar",
        )?;
        let wind_total = capacity_for(
            shortfall * (1.0 - fraction),
            wind_capacity,
            wind_generation,
            sim_hours,
            "wind",
        )?;
        debug!(
            areas = pooled.len(),
            shortfall, solar_total, wind_total, "collaborative plan"
        );

        let share = |part: f64, whole: f64| if whole > 0.0 { part / whole } else { 0.0 };
        let mut table = CapacityTable::new();
        for target in targets {
            let plan = if target.participating || self.include_non_participating {
                CapacityPlan::with_additions(
                    target,
                    solar_total * share(target.prev_solar_capacity, solar_capacity),
                    wind_total * share(target.prev_wind_capacity, wind_capacity),
                )
            } else {
                CapacityPlan::unchanged(target)
            };
            table.insert(target.area.clone(), plan);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(area: &str, demand: f64, clean: f64, solar: (f64, f64), wind: (f64, f64)) -> CapacityTarget {
        CapacityTarget {
            area: area.to_string(),
            target_fraction: 0.5,
            demand,
            prev_clean_generation: clean,
            external_clean_generation: 0.0,
            prev_solar_capacity: solar.0,
            prev_solar_generation: solar.1,
            prev_wind_capacity: wind.0,
            prev_wind_generation: wind.1,
            participating: true,
        }
    }

    #[test]
    fn independent_closes_each_shortfall() {
        // 100 MW of solar at 25% over 100 h made 2500 MWh; wind likewise at 40%.
        let a = target("Texas", 20_000.0, 6_000.0, (100.0, 2_500.0), (100.0, 4_000.0));
        let table = Independent
            .next_capacities(&[a], 100.0, Some(0.5))
            .unwrap();
        let plan = table["Texas"];
        // shortfall 4000 MWh: 2000 to solar at 25 MWh/MW, 2000 to wind at 40 MWh/MW
        assert!((plan.solar_added - 80.0).abs() < 1e-9);
        assert!((plan.wind_added - 50.0).abs() < 1e-9);
        assert!((plan.next_solar_capacity - 180.0).abs() < 1e-9);
    }

    #[test]
    fn met_targets_add_nothing() {
        let a = target("Western", 10_000.0, 9_000.0, (10.0, 100.0), (10.0, 100.0));
        let table = Independent.next_capacities(&[a], 10.0, None).unwrap();
        assert_eq!(table["Western"].solar_added, 0.0);
        assert_eq!(table["Western"].wind_added, 0.0);
    }

    #[test]
    fn collaborative_pools_and_shares_by_capacity() {
        // Texas overshoots by 1000, Western falls 3000 short: pooled 2000.
        let texas = target("Texas", 10_000.0, 6_000.0, (300.0, 3_000.0), (100.0, 1_000.0));
        let western = target("Western", 10_000.0, 2_000.0, (100.0, 1_000.0), (300.0, 3_000.0));
        let table = Collaborative::default()
            .next_capacities(&[texas, western], 10.0, Some(1.0))
            .unwrap();
        // pooled solar factor: 4000 MWh / (400 MW * 10 h) = 1.0
        let total: f64 = table.values().map(|p| p.solar_added).sum();
        assert!((total - 200.0).abs() < 1e-9);
        assert!((table["Texas"].solar_added - 150.0).abs() < 1e-9);
        assert!((table["Western"].solar_added - 50.0).abs() < 1e-9);
        assert_eq!(table["Western"].wind_added, 0.0);
    }

    #[test]
    fn non_participants_are_left_out_unless_included() {
        let texas = target("Texas", 10_000.0, 4_000.0, (100.0, 1_000.0), (100.0, 1_000.0));
        let mut western = target("Western", 10_000.0, 0.0, (100.0, 1_000.0), (100.0, 1_000.0));
        western.participating = false;
        let targets = [texas, western];

        let table = Collaborative::default()
            .next_capacities(&targets, 10.0, None)
            .unwrap();
        assert_eq!(table["Western"], CapacityPlan::unchanged(&targets[1]));
        assert!(table["Texas"].solar_added > 0.0);

        let table = Collaborative {
            include_non_participating: true,
        }
        .next_capacities(&targets, 10.0, None)
        .unwrap();
        assert!(table["Western"].solar_added > 0.0);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let a = target("Texas", 100.0, 0.0, (0.0, 0.0), (0.0, 0.0));
        assert!(Independent.next_capacities(&[a.clone()], 0.0, None).is_err());
        assert!(Independent.next_capacities(&[a.clone()], 10.0, Some(1.5)).is_err());
        // a shortfall but no previous capacity to learn a capacity factor from
        assert!(Independent.next_capacities(&[a], 10.0, None).is_err());
    }
}
