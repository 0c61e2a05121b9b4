//! Per grid model constants.
//!
//! A [`ModelImmutables`] bundle is shared, read-only, by every grid of the
//! same model. The `usa_tamu` bundle is built into the crate; bundles for
//! other models are assembled from the `zone.csv` shipped with their data.

pub mod resources;
pub mod zones;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{GridError, GridResult};

pub use resources::{europe_resources, usa_resources, ResourceInfo, ResourceTaxonomy};
pub use zones::{usa_tamu_zones, AreaType, DivisionKind, Zone, ZoneTable};

/// Symbolic name of a grid model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridModel {
    UsaTamu,
    Hifld,
    EuropeTub,
}

impl GridModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridModel::UsaTamu => "usa_tamu",
            GridModel::Hifld => "hifld",
            GridModel::EuropeTub => "europe_tub",
        }
    }

    pub fn resources(&self) -> ResourceTaxonomy {
        match self {
            GridModel::UsaTamu | GridModel::Hifld => usa_resources(),
            GridModel::EuropeTub => europe_resources(),
        }
    }

    pub fn division_kind(&self) -> DivisionKind {
        match self {
            GridModel::UsaTamu | GridModel::Hifld => DivisionKind::State,
            GridModel::EuropeTub => DivisionKind::Country,
        }
    }

    /// Name of the union of every interconnect of the model.
    pub fn all_alias(&self) -> &'static str {
        match self {
            GridModel::UsaTamu | GridModel::Hifld => "USA",
            GridModel::EuropeTub => "Europe",
        }
    }
}

impl fmt::Display for GridModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridModel {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usa_tamu" => Ok(GridModel::UsaTamu),
            "hifld" => Ok(GridModel::Hifld),
            "europe_tub" => Ok(GridModel::EuropeTub),
            other => Err(GridError::invalid(format!("unknown grid model '{other}'"))),
        }
    }
}

/// Defaults applied to storage entries that omit a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageDefaults {
    /// Hours of energy at rated power
    pub duration: f64,
    pub min_stor: f64,
    pub max_stor: f64,
    #[serde(rename = "InEff")]
    pub in_eff: f64,
    #[serde(rename = "OutEff")]
    pub out_eff: f64,
    /// $/MWh
    pub energy_value: f64,
    #[serde(rename = "LossFactor")]
    pub loss_factor: f64,
    pub terminal_min: f64,
    pub terminal_max: f64,
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            duration: 4.0,
            min_stor: 0.05,
            max_stor: 0.95,
            in_eff: 0.9,
            out_eff: 0.9,
            energy_value: 20.0,
            loss_factor: 0.0,
            terminal_min: 0.0,
            terminal_max: 1.0,
        }
    }
}

/// Read-only constants of one grid model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelImmutables {
    pub model: GridModel,
    pub resources: ResourceTaxonomy,
    pub zones: ZoneTable,
    pub storage: StorageDefaults,
}

static USA_TAMU: Lazy<GridResult<Arc<ModelImmutables>>> = Lazy::new(|| {
    let model = GridModel::UsaTamu;
    let zones = ZoneTable::new(model.division_kind(), model.all_alias(), usa_tamu_zones())?;
    Ok(Arc::new(ModelImmutables::with_zones(model, zones)))
});

impl ModelImmutables {
    /// Bundle for a model whose zone table comes from its data files.
    pub fn with_zones(model: GridModel, zones: ZoneTable) -> Self {
        Self {
            model,
            resources: model.resources(),
            zones,
            storage: StorageDefaults::default(),
        }
    }

    /// The bundle built into the crate. Only `usa_tamu` ships a zone table.
    pub fn builtin(model: GridModel) -> GridResult<Arc<ModelImmutables>> {
        match model {
            GridModel::UsaTamu => match &*USA_TAMU {
                Ok(bundle) => Ok(Arc::clone(bundle)),
                Err(err) => Err(GridError::Other(err.to_string())),
            },
            other => Err(GridError::missing(format!(
                "no built-in zone table for grid model {other}; load it from zone.csv"
            ))),
        }
    }

    /// Build a zone table for `model` from explicit rows.
    pub fn zone_table(model: GridModel, zones: Vec<Zone>) -> GridResult<ZoneTable> {
        ZoneTable::new(model.division_kind(), model.all_alias(), zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_defaults() {
        let d = StorageDefaults::default();
        assert_eq!(d.duration, 4.0);
        assert_eq!(d.min_stor, 0.05);
        assert_eq!(d.max_stor, 0.95);
        assert_eq!(d.in_eff, 0.9);
        assert_eq!(d.out_eff, 0.9);
        assert_eq!(d.energy_value, 20.0);
        assert_eq!(d.loss_factor, 0.0);
        assert_eq!(d.terminal_min, 0.0);
        assert_eq!(d.terminal_max, 1.0);
    }

    #[test]
    fn builtin_bundle_is_shared() {
        let a = ModelImmutables::builtin(GridModel::UsaTamu).unwrap();
        let b = ModelImmutables::builtin(GridModel::UsaTamu).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.zones.zone_id("Nevada").map(|z| z.value()), Some(208));
        assert!(ModelImmutables::builtin(GridModel::EuropeTub).is_err());
    }

    #[test]
    fn grid_model_round_trips_through_its_name() {
        for model in [GridModel::UsaTamu, GridModel::Hifld, GridModel::EuropeTub] {
            assert_eq!(model.as_str().parse::<GridModel>().unwrap(), model);
        }
        assert!("pypsa".parse::<GridModel>().is_err());
    }
}
