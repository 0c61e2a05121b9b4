//! `grid.pkl`: the grid handed to the simulator.
//!
//! The artifact is a tagged JSON record so any consumer can read it without
//! knowing the producing language:
//!
//! ```text
//! { "format": "gridscen.grid", "version": 1, "created_at": "...", "grid": { ... } }
//! ```
//!
//! `grid` carries the nine tables, the interconnect list, the grid model
//! and the model's zone rows, so a read artifact is self-contained.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use gridscen_core::Grid;

pub const GRID_ARTIFACT_FILE: &str = "grid.pkl";
pub const GRID_ARTIFACT_FORMAT: &str = "gridscen.grid";
pub const GRID_ARTIFACT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactOut<'a> {
    format: &'static str,
    version: u32,
    created_at: DateTime<Utc>,
    grid: &'a Grid,
}

#[derive(Deserialize)]
struct ArtifactIn {
    format: String,
    version: u32,
    #[allow(dead_code)]
    created_at: Option<DateTime<Utc>>,
    grid: Grid,
}

/// Serialize a grid to the artifact form.
pub fn grid_to_artifact_string(grid: &Grid) -> Result<String> {
    let record = ArtifactOut {
        format: GRID_ARTIFACT_FORMAT,
        version: GRID_ARTIFACT_VERSION,
        created_at: Utc::now(),
        grid,
    };
    serde_json::to_string(&record).context("serializing grid artifact")
}

/// Write `grid` to `path`.
pub fn write_grid_artifact(grid: &Grid, path: &Path) -> Result<()> {
    let json = grid_to_artifact_string(grid)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing grid artifact to {}", path.display()))?;
    info!(path = %path.display(), plants = grid.plant.len(), "wrote grid artifact");
    Ok(())
}

/// Read a grid artifact written by [`write_grid_artifact`].
pub fn read_grid_artifact(path: &Path) -> Result<Grid> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading grid artifact {}", path.display()))?;
    let record: ArtifactIn = serde_json::from_str(&text)
        .with_context(|| format!("parsing grid artifact {}", path.display()))?;
    if record.format != GRID_ARTIFACT_FORMAT {
        bail!(
            "{} is a '{}' record, expected '{}'",
            path.display(),
            record.format,
            GRID_ARTIFACT_FORMAT
        );
    }
    if record.version > GRID_ARTIFACT_VERSION {
        bail!(
            "grid artifact version {} is newer than supported version {}",
            record.version,
            GRID_ARTIFACT_VERSION
        );
    }
    Ok(record.grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridscen_core::fixtures::sample_grid;
    use gridscen_core::PlantId;
    use tempfile::tempdir;

    #[test]
    fn artifact_round_trip() {
        let mut grid = sample_grid().unwrap();
        grid.plant.get_mut(&PlantId::new(3)).unwrap().ramp_30 = f64::INFINITY;
        let dir = tempdir().unwrap();
        let path = dir.path().join(GRID_ARTIFACT_FILE);
        write_grid_artifact(&grid, &path).unwrap();
        let back = read_grid_artifact(&path).unwrap();
        assert_eq!(back, grid);
        assert_eq!(back.gencost.after, grid.gencost.after);
        assert!(back.plant[&PlantId::new(3)].ramp_30.is_infinite());
        assert_eq!(back.zone_table().zones.len(), grid.zone_table().zones.len());
    }

    #[test]
    fn artifact_is_tagged() {
        let grid = sample_grid().unwrap();
        let text = grid_to_artifact_string(&grid).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["format"], GRID_ARTIFACT_FORMAT);
        assert_eq!(value["version"], 1);
        for table in ["bus", "sub", "bus2sub", "branch", "dcline", "plant", "gencost", "storage"] {
            assert!(value["grid"].get(table).is_some(), "{table} missing");
        }
    }

    #[test]
    fn foreign_records_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.pkl");
        std::fs::write(&path, r#"{"format":"other","version":1,"grid":{}}"#).unwrap();
        assert!(read_grid_artifact(&path).is_err());
    }
}
