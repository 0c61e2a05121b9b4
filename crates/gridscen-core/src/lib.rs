//! # gridscen-core: grid model for scenario building
//!
//! The relational grid representation shared by every gridscen crate.
//!
//! ## Data model
//!
//! A [`Grid`] carries nine tables (bus, substation, bus-to-substation,
//! branch, DC line, plant, gencost, storage, zone mappings), each an ordered
//! map keyed by a typed id:
//!
//! - [`BusId`], [`SubId`], [`BranchId`], [`DcLineId`], [`PlantId`],
//!   [`StorageId`], [`ZoneId`]
//!
//! The constants of the grid's model (resource taxonomy, zone table,
//! storage defaults) live in a shared [`ModelImmutables`] bundle.
//!
//! ## Invariants
//!
//! [`validate::validate_grid`] checks the cross-table rules (dangling
//! references, islanded buses, bus/substation coverage, interconnect
//! crossings, transformer substations, line voltages, gencost alignment,
//! and AC components per interconnect) and reports every violation at once.
//!
//! ## Modules
//!
//! - [`grid`] - table rows and the [`Grid`] container
//! - [`immutables`] - per model constants and [`ZoneTable::area_to_loadzone`]
//! - [`geo`] - haversine distance and nearest-neighbor search
//! - [`validate`] - invariant checks
//! - [`diagnostics`] - issue collection
//! - [`error`] - [`GridError`] and [`GridResult`]

pub mod diagnostics;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod geo;
pub mod grid;
pub mod ids;
pub mod immutables;
pub mod validate;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GridError, GridResult};
pub use grid::{
    Branch, BranchDeviceType, Bus, BusToSub, BusType, CostModel, DcLine, GenCost, GenCostTables,
    Grid, Plant, Storage, StorageData, StorageGen, Substation,
};
pub use ids::{next_id, BranchId, BusId, DcLineId, IdLike, PlantId, StorageId, SubId, ZoneId};
pub use immutables::{
    AreaType, GridModel, ModelImmutables, ResourceInfo, ResourceTaxonomy, StorageDefaults, Zone,
    ZoneTable,
};
pub use validate::{
    check_grid, check_grid_allowing_detached, validate_grid, validate_grid_allowing_detached,
};
