use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::{Path, PathBuf};

use gridscen_core::GridModel;

use crate::transform_profile::ScenarioInfo;

/// Settings of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default = "default_grid_model")]
    pub grid_model: GridModel,
    #[serde(default = "default_interconnect")]
    pub interconnect: Vec<String>,
    #[serde(default)]
    pub base_profiles: ScenarioInfo,
    /// Directory holding base and electrification profiles
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    #[serde(default = "default_segments")]
    pub linearization_segments: usize,
    /// Re-run the grid validator on the configured grid
    #[serde(default = "default_validate_output")]
    pub validate_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_table: Option<PathBuf>,
}

fn default_grid_model() -> GridModel {
    GridModel::UsaTamu
}

fn default_interconnect() -> Vec<String> {
    vec!["USA".to_string()]
}

fn default_profile_dir() -> PathBuf {
    PathBuf::from("profiles")
}

fn default_segments() -> usize {
    1
}

fn default_validate_output() -> bool {
    true
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            grid_model: default_grid_model(),
            interconnect: default_interconnect(),
            base_profiles: ScenarioInfo::default(),
            profile_dir: default_profile_dir(),
            linearization_segments: default_segments(),
            validate_output: default_validate_output(),
            change_table: None,
        }
    }
}

impl ScenarioConfig {
    /// Resolve relative paths against the directory of the config file.
    fn rebase(mut self, base: &Path) -> Self {
        if self.profile_dir.is_relative() {
            self.profile_dir = base.join(&self.profile_dir);
        }
        if let Some(path) = self.change_table.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

/// Load a scenario config from TOML, YAML or JSON, chosen by extension.
/// Relative paths inside it are taken relative to the file.
pub fn load_config_from_path(path: &Path) -> Result<ScenarioConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading scenario config '{}'", path.display()))?;
    let config: ScenarioConfig = match extension(path).as_deref() {
        Some("toml") => toml::from_str(&data).context("parsing scenario config toml")?,
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&data).context("parsing scenario config yaml")?
        }
        Some("json") => serde_json::from_str(&data).context("parsing scenario config json")?,
        _ => toml::from_str(&data)
            .or_else(|_| serde_yaml::from_str(&data))
            .context("parsing scenario config")?,
    };
    if config.linearization_segments == 0 {
        return Err(anyhow!("linearization_segments must be at least 1"));
    }
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(config.rebase(base))
}

/// Read a YAML or JSON document into a JSON value. YAML mapping keys
/// (often bare integers such as zone ids) become strings.
pub fn load_document(path: &Path) -> Result<Value> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading '{}'", path.display()))?;
    match extension(path).as_deref() {
        Some("json") => serde_json::from_str(&data)
            .with_context(|| format!("parsing json '{}'", path.display())),
        _ => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(&data)
                .with_context(|| format!("parsing yaml '{}'", path.display()))?;
            yaml_to_json(yaml)
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;
    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                Value::Number(
                    Number::from_f64(f).ok_or_else(|| anyhow!("non-finite number {f}"))?,
                )
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => return Err(anyhow!("unsupported mapping key {other:?}")),
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, Builder};

    #[test]
    fn toml_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scenario.toml");
        fs::write(
            &path,
            "interconnect = [\"Texas\"]\nchange_table = \"ct.yaml\"\n\n[base_profiles]\nbase_solar = \"v2\"\n",
        )
        .unwrap();
        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.grid_model, GridModel::UsaTamu);
        assert_eq!(config.interconnect, vec!["Texas".to_string()]);
        assert_eq!(config.base_profiles.base_solar, "v2");
        assert_eq!(config.base_profiles.base_wind, "vJan2021");
        assert_eq!(config.linearization_segments, 1);
        assert!(config.validate_output);
        assert_eq!(config.profile_dir, dir.path().join("profiles"));
        assert_eq!(config.change_table, Some(dir.path().join("ct.yaml")));
    }

    #[test]
    fn zero_segments_are_rejected() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "linearization_segments: 0").unwrap();
        assert!(load_config_from_path(file.path()).is_err());
    }

    #[test]
    fn yaml_integer_keys_become_strings() {
        let mut file = Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "solar:\n  zone_id:\n    301: 1.41\nremove_branch: [5]").unwrap();
        let value = load_document(file.path()).unwrap();
        assert_eq!(value["solar"]["zone_id"]["301"], serde_json::json!(1.41));
        assert_eq!(value["remove_branch"], serde_json::json!([5]));
    }
}
