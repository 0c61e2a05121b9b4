//! # gridscen-io: grid sources and simulator artifacts
//!
//! Two construction paths lead to a [`gridscen_core::Grid`]:
//!
//! - [`csv_bundle::load_csv_bundle`] reads the canonical CSV tables and
//!   keeps the requested interconnects.
//! - [`mat::load_mat_grid`] (feature `mat`) reads a simulator MAT-file
//!   (`mdi`/`mpc` structs or flat matrices) and takes categorical data
//!   from the CSV bundle the case was built from.
//!
//! Both return grids with derived columns populated that pass every
//! invariant check. [`artifact`] writes and reads `grid.pkl`, the tagged
//! JSON record handed to the simulator.
//!
//! ```rust,no_run
//! use gridscen_core::GridModel;
//! use gridscen_io::csv_bundle::load_csv_bundle;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let grid = load_csv_bundle(
//!         Path::new("data/usa_tamu"),
//!         GridModel::UsaTamu,
//!         &["Texas".to_string()],
//!     )?;
//!     println!("{} plants", grid.plant.len());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod conversions;
pub mod csv_bundle;
#[cfg(feature = "mat")]
pub mod mat;

pub use artifact::{read_grid_artifact, write_grid_artifact, GRID_ARTIFACT_FILE};
pub use csv_bundle::{load_csv_bundle, write_csv_bundle};
#[cfg(feature = "mat")]
pub use mat::{grid_from_case, load_mat_grid, MatCase, MatImportOptions};
