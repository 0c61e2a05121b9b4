//! # gridscen-scenarios: scenarios on top of a base grid
//!
//! A scenario is a base [`gridscen_core::Grid`] plus a [`ChangeTable`] of
//! edits. The pipeline is:
//!
//! 1. accumulate edits through the validating [`ChangeTable`] mutators (or
//!    load a change-table document with [`ChangeTable::from_path`]);
//! 2. [`transform_grid`] applies them to a copy of the grid in a fixed
//!    stage order;
//! 3. [`ProfileTransformer`] reshapes the base demand, hydro, solar and wind
//!    profiles to the transformed grid, adding electrified demand;
//! 4. [`configure_grid`] derives Pmin, `ramp_30` and piecewise-linear costs;
//! 5. [`prepare_simulation_input`] writes `grid.pkl`, the profile CSVs and
//!    the demand flexibility files.
//!
//! [`run_scenario`] chains all of it from a [`ScenarioConfig`].
//! [`capacity`] plans renewable build-out between simulation rounds.

pub mod capacity;
pub mod change_table;
pub mod config;
pub mod configure;
pub mod electrification;
pub mod flexibility;
pub mod scaling;
pub mod simulation_input;
pub mod transform_grid;
pub mod transform_profile;

pub use capacity::{
    CapacityPlan, CapacityStrategy, CapacityTable, CapacityTarget, Collaborative, Independent,
};
pub use change_table::{
    ChangeSet, ChangeTable, NewBranch, NewBus, NewDcLine, NewPlant, NewStorage, NextIds,
};
pub use config::{load_config_from_path, load_document, ScenarioConfig};
pub use configure::{configure_grid, linearize, ramp_30};
pub use electrification::{electrified_demand, ElectrificationSpec};
pub use flexibility::{DemandFlexibility, DemandFlexibilitySpec};
pub use scaling::{scaling_records, ScalingRecord};
pub use simulation_input::{prepare_simulation_input, run_scenario, SimulationInputManifest};
pub use transform_grid::{added_buses, transform_grid};
pub use transform_profile::{DirectoryProfileSource, ProfileSource, ProfileTransformer, ScenarioInfo};
