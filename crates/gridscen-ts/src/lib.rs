//! Hourly profiles aligned with a grid.
//!
//! A [`Profile`] is an hours x ids matrix: zone ids for demand, plant ids for
//! hydro, solar and wind, held in a polars `DataFrame`. [`codec`] reads and writes the CSV layout the
//! simulator consumes.

pub mod codec;
pub mod profile;

pub use codec::{read_profile_csv, write_profile_csv, TIMESTAMP_FORMAT};
pub use profile::{Profile, ProfileKind, DEMAND_INDEX, PLANT_INDEX};
