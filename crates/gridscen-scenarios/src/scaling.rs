//! Flat view of the scaling entries of a change set.
//!
//! Every numeric leaf under a scaling key becomes one [`ScalingRecord`]
//! whose path runs from the top-level key to the id, e.g.
//! `["solar", "zone_id", "301"] -> 1.41`.

use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

use gridscen_core::{GridError, GridResult};

use crate::change_table::{ChangeSet, COST_SUFFIX, PMIN_SUFFIX};

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRecord {
    pub path: Vec<String>,
    pub value: f64,
}

impl ScalingRecord {
    /// Top-level change-table key.
    pub fn key(&self) -> &str {
        self.path.first().map(String::as_str).unwrap_or_default()
    }

    /// `zone_id`, `plant_id`, `branch_id` or `dcline_id`.
    pub fn scope(&self) -> Option<&str> {
        self.path.get(1).map(String::as_str)
    }

    /// The id at the end of the path, parsed as `T`.
    pub fn id<T: FromStr>(&self) -> Option<T> {
        self.path.get(2).and_then(|id| id.parse().ok())
    }
}

fn walk(path: &mut Vec<String>, value: &Value, out: &mut Vec<ScalingRecord>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                walk(path, child, out);
                path.pop();
            }
        }
        Value::Number(n) => {
            if let Some(value) = n.as_f64() {
                out.push(ScalingRecord {
                    path: path.clone(),
                    value,
                });
            }
        }
        _ => {}
    }
}

fn walk_entry<T: Serialize>(key: String, entry: &T, out: &mut Vec<ScalingRecord>) -> GridResult<()> {
    let value = serde_json::to_value(entry)
        .map_err(|e| GridError::Other(format!("serializing scaling entry '{key}': {e}")))?;
    let mut path = vec![key];
    walk(&mut path, &value, out);
    Ok(())
}

/// Every scaling factor of `changes`: resource, `_cost` and `_pmin` keys,
/// then `branch`, `dcline` and `demand`.
pub fn scaling_records(changes: &ChangeSet) -> GridResult<Vec<ScalingRecord>> {
    let mut out = Vec::new();
    for (resource, scaling) in &changes.plant_scaling {
        walk_entry(resource.clone(), scaling, &mut out)?;
    }
    for (resource, scaling) in &changes.cost_scaling {
        walk_entry(format!("{resource}{COST_SUFFIX}"), scaling, &mut out)?;
    }
    for (resource, scaling) in &changes.pmin_scaling {
        walk_entry(format!("{resource}{PMIN_SUFFIX}"), scaling, &mut out)?;
    }
    walk_entry("branch".to_string(), &changes.branch, &mut out)?;
    walk_entry("dcline".to_string(), &changes.dcline, &mut out)?;
    walk_entry("demand".to_string(), &changes.demand, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_table::PlantScaling;
    use gridscen_core::{DcLineId, PlantId, ZoneId};

    #[test]
    fn leaves_carry_their_full_path() {
        let mut changes = ChangeSet::default();
        changes.plant_scaling.insert(
            "solar".into(),
            PlantScaling {
                zone_id: [(ZoneId::new(301), 1.41)].into(),
                plant_id: [(PlantId::new(6), 2.0)].into(),
            },
        );
        changes.cost_scaling.insert(
            "ng".into(),
            PlantScaling {
                zone_id: [(ZoneId::new(308), 0.9)].into(),
                ..Default::default()
            },
        );
        changes.dcline.dcline_id.insert(DcLineId::new(7), 0.0);

        let records = scaling_records(&changes).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].path, vec!["solar", "plant_id", "6"]);
        assert_eq!(records[1].path, vec!["solar", "zone_id", "301"]);
        assert_eq!(records[1].value, 1.41);
        assert_eq!(records[2].key(), "ng_cost");
        assert_eq!(records[3].scope(), Some("dcline_id"));
        assert_eq!(records[3].id::<DcLineId>(), Some(DcLineId::new(7)));
    }

    #[test]
    fn empty_change_set_has_no_records() {
        assert!(scaling_records(&ChangeSet::default()).unwrap().is_empty());
    }
}
