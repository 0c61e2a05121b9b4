use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use gridscen_core::{check_grid_allowing_detached, Grid};
use gridscen_io::{write_grid_artifact, GRID_ARTIFACT_FILE};
use gridscen_ts::{write_profile_csv, Profile, ProfileKind};

use crate::change_table::ChangeTable;
use crate::config::ScenarioConfig;
use crate::configure::configure_grid;
use crate::flexibility::DemandFlexibility;
use crate::transform_grid::{added_buses, transform_grid};
use crate::transform_profile::{DirectoryProfileSource, ProfileTransformer};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub hours: usize,
    pub columns: usize,
}

/// Record of one prepared input directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationInputManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub grid_file: String,
    pub plants: usize,
    pub profiles: BTreeMap<String, ProfileSummary>,
    /// Every file written, relative to the input directory
    pub files: Vec<String>,
}

/// Write everything the simulator reads into `dir`: `grid.pkl`, one CSV
/// per profile, the demand flexibility files and `manifest.json`.
pub fn prepare_simulation_input(
    dir: &Path,
    grid: &Grid,
    profiles: &BTreeMap<ProfileKind, Profile>,
    flex: &DemandFlexibility,
) -> Result<SimulationInputManifest> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating simulation input directory '{}'", dir.display()))?;

    write_grid_artifact(grid, &dir.join(GRID_ARTIFACT_FILE))?;
    let mut files = vec![GRID_ARTIFACT_FILE.to_string()];

    let mut summaries = BTreeMap::new();
    for (kind, profile) in profiles {
        let file = format!("{kind}.csv");
        write_profile_csv(profile, &dir.join(&file))
            .with_context(|| format!("writing {kind} profile"))?;
        files.push(file);
        summaries.insert(
            kind.to_string(),
            ProfileSummary {
                hours: profile.len(),
                columns: profile.width(),
            },
        );
    }
    files.extend(flex.write(dir)?);

    let manifest = SimulationInputManifest {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        grid_file: GRID_ARTIFACT_FILE.to_string(),
        plants: grid.plant.len(),
        profiles: summaries,
        files,
    };
    write_manifest(&dir.join(MANIFEST_FILE), &manifest)?;
    info!(
        dir = %dir.display(),
        run_id = %manifest.run_id,
        files = manifest.files.len(),
        "simulation input prepared"
    );
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &SimulationInputManifest) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating simulation manifest '{}'", path.display()))?;
    serde_json::to_writer_pretty(file, manifest)
        .with_context(|| format!("writing simulation manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<SimulationInputManifest> {
    let file = File::open(path)
        .with_context(|| format!("opening simulation manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing simulation manifest '{}'", path.display()))
}

/// Full run over `grid`: replay the configured change table, transform and
/// configure the grid, reshape the base profiles from `profile_dir` and
/// write the simulator inputs to `out_dir`.
pub fn run_scenario(
    config: &ScenarioConfig,
    grid: &Grid,
    out_dir: &Path,
) -> Result<SimulationInputManifest> {
    let ct = match &config.change_table {
        Some(path) => ChangeTable::from_path(grid, path)?,
        None => ChangeTable::new(grid),
    };
    let transformed = transform_grid(grid, &ct).context("transforming grid")?;
    let configured = configure_grid(&transformed, config.linearization_segments)
        .context("configuring grid")?;
    if config.validate_output {
        check_grid_allowing_detached(&configured, &added_buses(grid, &configured))
            .context("validating configured grid")?;
    }

    let source = DirectoryProfileSource::new(&config.profile_dir);
    let transformer = ProfileTransformer::new(&config.base_profiles, &transformed, &ct, &source)?;
    let profiles: BTreeMap<ProfileKind, Profile> = transformer.get_all()?.into_iter().collect();
    let flex = DemandFlexibility::resolve(
        ct.changes().demand_flexibility.as_ref(),
        &source,
        &transformed,
    )?;
    prepare_simulation_input(out_dir, &configured, &profiles, &flex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use gridscen_io::read_grid_artifact;
    use gridscen_core::fixtures::sample_grid;
    use tempfile::tempdir;

    fn demand() -> Profile {
        let start = NaiveDate::from_ymd_opt(2016, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let mut profile = Profile::hourly("UTC Time", start, 3);
        profile.insert_column(301, vec![1.0, 2.0, 3.0]).unwrap();
        profile
    }

    #[test]
    fn writes_artifacts_and_manifest() {
        let dir = tempdir().unwrap();
        let grid = sample_grid().unwrap();
        let profiles = BTreeMap::from([(ProfileKind::Demand, demand())]);

        let manifest =
            prepare_simulation_input(dir.path(), &grid, &profiles, &DemandFlexibility::disabled())
                .unwrap();
        assert_eq!(
            manifest.files,
            vec!["grid.pkl", "demand.csv", "demand_flexibility_parameters.csv"]
        );
        assert_eq!(manifest.profiles["demand"].hours, 3);
        for file in &manifest.files {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }

        let read = read_grid_artifact(&dir.path().join("grid.pkl")).unwrap();
        assert_eq!(read, grid);
        let loaded = load_manifest(&dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(loaded, manifest);
    }
}
