//! Demand flexibility: parameters and optional up/down profiles handed to
//! the simulator next to the demand profile.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use gridscen_core::{Grid, GridError, GridResult};
use gridscen_ts::{write_profile_csv, Profile, DEMAND_INDEX};

use crate::transform_profile::ProfileSource;

pub const PARAMETERS_FILE: &str = "demand_flexibility_parameters.csv";

/// The `demand_flexibility` change-table entry. Profile fields name
/// versions of the `demand_flexibility_{up,dn,cost_up,cost_dn}` profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandFlexibilitySpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval_balance: bool,
    #[serde(default)]
    pub rolling_balance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_up: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_dn: Option<String>,
}

impl DemandFlexibilitySpec {
    pub fn validate(&self) -> GridResult<()> {
        if self.enabled && (self.up.is_none() || self.dn.is_none()) {
            return Err(GridError::invalid(
                "enabled demand flexibility needs both 'up' and 'dn' profile versions",
            ));
        }
        if self.duration == Some(0) {
            return Err(GridError::invalid(
                "demand flexibility duration must be a positive number of hours",
            ));
        }
        if self.rolling_balance && self.duration.is_none() {
            return Err(GridError::invalid(
                "rolling_balance needs a duration",
            ));
        }
        Ok(())
    }
}

/// One row of `demand_flexibility_parameters.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandFlexibilityParameters {
    pub enabled: bool,
    pub interval_balance: bool,
    pub rolling_balance: bool,
    /// Hours; 0 when no rolling window is used
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemandFlexibility {
    pub parameters: DemandFlexibilityParameters,
    pub up: Option<Profile>,
    pub dn: Option<Profile>,
    pub cost_up: Option<Profile>,
    pub cost_dn: Option<Profile>,
}

impl DemandFlexibility {
    /// Flexibility switched off; only the parameter file is written.
    pub fn disabled() -> Self {
        Self {
            parameters: DemandFlexibilityParameters {
                enabled: false,
                interval_balance: false,
                rolling_balance: false,
                duration: 0,
            },
            up: None,
            dn: None,
            cost_up: None,
            cost_dn: None,
        }
    }

    /// Load the profiles named by `spec`, restricted to the zones of `grid`.
    pub fn resolve(
        spec: Option<&DemandFlexibilitySpec>,
        source: &dyn ProfileSource,
        grid: &Grid,
    ) -> Result<Self> {
        let spec = match spec {
            Some(spec) => spec,
            None => return Ok(Self::disabled()),
        };
        spec.validate()?;
        let load = |suffix: &str, version: &Option<String>| -> Result<Option<Profile>> {
            let version = match version {
                Some(v) if spec.enabled => v,
                _ => return Ok(None),
            };
            let name = format!("demand_flexibility_{suffix}");
            let mut profile = source
                .profile(&name, version)
                .with_context(|| format!("loading {name} version {version}"))?;
            profile.retain_columns(|id| grid.id2zone.keys().any(|z| z.value() == id));
            profile.set_index_name(DEMAND_INDEX);
            Ok(Some(profile))
        };
        Ok(Self {
            parameters: DemandFlexibilityParameters {
                enabled: spec.enabled,
                interval_balance: spec.interval_balance,
                rolling_balance: spec.rolling_balance,
                duration: spec.duration.unwrap_or(0),
            },
            up: load("up", &spec.up)?,
            dn: load("dn", &spec.dn)?,
            cost_up: load("cost_up", &spec.cost_up)?,
            cost_dn: load("cost_dn", &spec.cost_dn)?,
        })
    }

    /// Write the parameter file and whichever profiles are present; returns
    /// the file names written.
    pub fn write(&self, dir: &Path) -> Result<Vec<String>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        let path = dir.join(PARAMETERS_FILE);
        let mut wtr = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        wtr.serialize(self.parameters)
            .with_context(|| format!("writing {}", path.display()))?;
        wtr.flush()
            .with_context(|| format!("flushing {}", path.display()))?;

        let mut written = vec![PARAMETERS_FILE.to_string()];
        for (suffix, profile) in [
            ("up", &self.up),
            ("dn", &self.dn),
            ("cost_up", &self.cost_up),
            ("cost_dn", &self.cost_dn),
        ] {
            if let Some(profile) = profile {
                let file = format!("demand_flexibility_{suffix}.csv");
                write_profile_csv(profile, &dir.join(&file))?;
                written.push(file);
            }
        }
        info!(
            dir = %dir.display(),
            enabled = self.parameters.enabled,
            files = written.len(),
            "wrote demand flexibility"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn enabled_needs_up_and_dn() {
        let mut spec = DemandFlexibilitySpec {
            enabled: true,
            up: Some("vJan2021".into()),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
        spec.dn = Some("vJan2021".into());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rolling_balance_needs_a_positive_duration() {
        let mut spec = DemandFlexibilitySpec {
            rolling_balance: true,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
        spec.duration = Some(0);
        assert!(spec.validate().is_err());
        spec.duration = Some(6);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn parameters_file_has_one_row() {
        let dir = tempdir().unwrap();
        let mut flex = DemandFlexibility::disabled();
        flex.parameters.rolling_balance = true;
        flex.parameters.duration = 12;
        let files = flex.write(dir.path()).unwrap();
        assert_eq!(files, vec![PARAMETERS_FILE.to_string()]);
        let text = fs::read_to_string(dir.path().join(PARAMETERS_FILE)).unwrap();
        assert_eq!(
            text,
            "enabled,interval_balance,rolling_balance,duration\nfalse,false,true,12\n"
        );
    }
}
