//! Resource (carrier) taxonomies per grid model.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Static attributes of one generation resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceInfo {
    pub name: String,
    pub color: String,
    pub label: String,
    /// kg CO2 per MWh of electricity
    pub emission_kg_per_mwh: Option<f64>,
    /// kg CO2 per MMBtu of fuel
    pub emission_kg_per_mmbtu: Option<f64>,
    pub efficiency: Option<f64>,
    /// `None` keeps Pmin as-is for dispatchable units and tracks the profile
    /// for variable ones.
    pub pmin_as_share_of_pmax: Option<f64>,
}

/// Resource set of a grid model, partitioned into the groups the
/// transformers and the configurator rely on.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceTaxonomy {
    pub resources: BTreeMap<String, ResourceInfo>,
    pub thermal: BTreeSet<String>,
    pub renewable: BTreeSet<String>,
    pub curtailable: BTreeSet<String>,
    pub carbon: BTreeSet<String>,
    pub clean: BTreeSet<String>,
    pub profile_resources: BTreeSet<String>,
    /// Collapses sub-types, e.g. `wind_offshore -> wind`
    pub group: BTreeMap<String, String>,
    /// Profile family (`hydro`, `solar`, `wind`) each profile resource reads from
    pub profile_kind: BTreeMap<String, String>,
}

impl ResourceTaxonomy {
    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn is_thermal(&self, resource: &str) -> bool {
        self.thermal.contains(resource)
    }

    pub fn is_renewable(&self, resource: &str) -> bool {
        self.renewable.contains(resource)
    }

    pub fn is_profile_resource(&self, resource: &str) -> bool {
        self.profile_resources.contains(resource)
    }

    pub fn info(&self, resource: &str) -> Option<&ResourceInfo> {
        self.resources.get(resource)
    }

    pub fn pmin_as_share_of_pmax(&self, resource: &str) -> Option<f64> {
        self.info(resource).and_then(|info| info.pmin_as_share_of_pmax)
    }

    pub fn group_of<'a>(&'a self, resource: &'a str) -> &'a str {
        self.group.get(resource).map(String::as_str).unwrap_or(resource)
    }

    /// Resources whose hourly availability is read from profile family `kind`.
    pub fn resources_for_profile(&self, kind: &str) -> BTreeSet<String> {
        self.profile_kind
            .iter()
            .filter(|(_, k)| k.as_str() == kind)
            .map(|(resource, _)| resource.clone())
            .collect()
    }
}

type Row = (
    &'static str,
    &'static str,
    &'static str,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);

fn build(
    rows: &[Row],
    thermal: &[&str],
    renewable: &[&str],
    carbon: &[&str],
    clean_extra: &[&str],
    profile_kind: &[(&str, &str)],
    group: &[(&str, &str)],
) -> ResourceTaxonomy {
    let set = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<BTreeSet<_>>();
    let resources = rows
        .iter()
        .map(|(name, color, label, per_mwh, per_mmbtu, efficiency, pmin_share)| {
            (
                name.to_string(),
                ResourceInfo {
                    name: name.to_string(),
                    color: color.to_string(),
                    label: label.to_string(),
                    emission_kg_per_mwh: *per_mwh,
                    emission_kg_per_mmbtu: *per_mmbtu,
                    efficiency: *efficiency,
                    pmin_as_share_of_pmax: *pmin_share,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    let renewable = set(renewable);
    let mut clean = renewable.clone();
    clean.extend(set(clean_extra));
    let profile_kind: BTreeMap<String, String> = profile_kind
        .iter()
        .map(|(r, k)| (r.to_string(), k.to_string()))
        .collect();
    ResourceTaxonomy {
        group: group
            .iter()
            .map(|(r, g)| (r.to_string(), g.to_string()))
            .collect(),
        thermal: set(thermal),
        curtailable: renewable.clone(),
        carbon: set(carbon),
        clean,
        profile_resources: profile_kind.keys().cloned().collect(),
        profile_kind,
        renewable,
        resources,
    }
}

/// Resources of the US models (`usa_tamu`, `hifld`).
pub fn usa_resources() -> ResourceTaxonomy {
    let rows: &[Row] = &[
        ("biomass", "xkcd:dark green", "Biomass", None, None, None, None),
        ("coal", "xkcd:light brown", "Coal", Some(994.0), Some(96.1), Some(0.33), None),
        ("dfo", "xkcd:royal blue", "Diesel Oil", Some(758.0), Some(75.2), Some(0.35), None),
        ("geothermal", "xkcd:hot pink", "Geothermal", None, None, None, Some(0.95)),
        ("hydro", "xkcd:light blue", "Hydro", None, None, None, None),
        ("ng", "xkcd:orchid", "Natural Gas", Some(616.0), Some(53.07), Some(0.41), None),
        ("nuclear", "xkcd:silver", "Nuclear", None, None, None, Some(0.95)),
        ("other", "xkcd:melon", "Other", None, None, None, None),
        ("solar", "xkcd:amber", "Solar", None, None, None, None),
        ("wind", "xkcd:green", "Wind", None, None, None, None),
        ("wind_offshore", "xkcd:teal", "Wind Offshore", None, None, None, None),
    ];
    build(
        rows,
        &["biomass", "coal", "dfo", "geothermal", "ng", "nuclear", "other"],
        &["solar", "wind", "wind_offshore"],
        &["coal", "dfo", "ng"],
        &["geothermal", "hydro", "nuclear"],
        &[
            ("hydro", "hydro"),
            ("solar", "solar"),
            ("wind", "wind"),
            ("wind_offshore", "wind"),
        ],
        &[("wind_offshore", "wind")],
    )
}

/// Carriers of the European PyPSA-derived model (`europe_tub`).
pub fn europe_resources() -> ResourceTaxonomy {
    let rows: &[Row] = &[
        ("biomass", "xkcd:dark green", "Biomass", None, None, None, None),
        ("CCGT", "xkcd:orchid", "Combined-Cycle Gas", Some(341.0), Some(58.0), Some(0.58), None),
        ("coal", "xkcd:light brown", "Hard Coal", Some(1018.0), Some(98.5), Some(0.33), None),
        ("geothermal", "xkcd:hot pink", "Geothermal", None, None, None, Some(0.95)),
        ("hydro", "xkcd:light blue", "Reservoir & Dam", None, None, None, None),
        ("lignite", "xkcd:brown", "Lignite", Some(1233.0), Some(119.3), Some(0.33), None),
        ("nuclear", "xkcd:silver", "Nuclear", None, None, None, Some(0.95)),
        ("OCGT", "xkcd:light purple", "Open-Cycle Gas", Some(483.0), Some(58.0), Some(0.41), None),
        ("offwind-ac", "xkcd:teal", "Offshore Wind (AC)", None, None, None, None),
        ("offwind-dc", "xkcd:dark teal", "Offshore Wind (DC)", None, None, None, None),
        ("oil", "xkcd:royal blue", "Oil", Some(760.0), Some(78.0), Some(0.35), None),
        ("onwind", "xkcd:green", "Onshore Wind", None, None, None, None),
        ("ror", "xkcd:sky blue", "Run of River", None, None, None, None),
        ("solar", "xkcd:amber", "Solar", None, None, None, None),
    ];
    build(
        rows,
        &[
            "biomass",
            "CCGT",
            "coal",
            "geothermal",
            "lignite",
            "nuclear",
            "OCGT",
            "oil",
        ],
        &["offwind-ac", "offwind-dc", "onwind", "solar"],
        &["CCGT", "coal", "lignite", "OCGT", "oil"],
        &["geothermal", "hydro", "nuclear", "ror"],
        &[
            ("offwind-ac", "wind"),
            ("offwind-dc", "wind"),
            ("onwind", "wind"),
            ("ror", "hydro"),
            ("solar", "solar"),
        ],
        &[
            ("CCGT", "gas"),
            ("OCGT", "gas"),
            ("offwind-ac", "offwind"),
            ("offwind-dc", "offwind"),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usa_groups_are_consistent() {
        let t = usa_resources();
        assert!(t.is_thermal("coal"));
        assert!(!t.is_thermal("solar"));
        assert!(t.is_profile_resource("wind_offshore"));
        assert_eq!(t.group_of("wind_offshore"), "wind");
        assert_eq!(t.group_of("coal"), "coal");
        assert!(t.clean.contains("nuclear"));
        assert!(t.curtailable.is_subset(&t.renewable));
        assert_eq!(t.pmin_as_share_of_pmax("nuclear"), Some(0.95));
        assert_eq!(t.pmin_as_share_of_pmax("coal"), None);
        let wind: Vec<_> = t.resources_for_profile("wind").into_iter().collect();
        assert_eq!(wind, vec!["wind".to_string(), "wind_offshore".to_string()]);
    }

    #[test]
    fn every_group_member_is_a_resource() {
        for t in [usa_resources(), europe_resources()] {
            for set in [&t.thermal, &t.renewable, &t.carbon, &t.clean, &t.profile_resources] {
                for name in set {
                    assert!(t.contains(name), "{name} missing from resource table");
                }
            }
        }
    }
}
