//! Hourly profile matrix: a timestamp index and one column per integer id.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Index label of demand profiles.
pub const DEMAND_INDEX: &str = "UTC Time";
/// Index label of plant profiles.
pub const PLANT_INDEX: &str = "UTC";

/// Profile families handed to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileKind {
    Demand,
    Hydro,
    Solar,
    Wind,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 4] = [
        ProfileKind::Demand,
        ProfileKind::Hydro,
        ProfileKind::Solar,
        ProfileKind::Wind,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Demand => "demand",
            ProfileKind::Hydro => "hydro",
            ProfileKind::Solar => "solar",
            ProfileKind::Wind => "wind",
        }
    }

    pub fn index_name(&self) -> &'static str {
        match self {
            ProfileKind::Demand => DEMAND_INDEX,
            _ => PLANT_INDEX,
        }
    }

    /// Whether columns are plant ids rather than zone ids.
    pub fn is_plant_profile(&self) -> bool {
        !matches!(self, ProfileKind::Demand)
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "demand" => Ok(ProfileKind::Demand),
            "hydro" => Ok(ProfileKind::Hydro),
            "solar" => Ok(ProfileKind::Solar),
            "wind" => Ok(ProfileKind::Wind),
            other => Err(anyhow!(
                "unknown profile kind '{}'; expected demand, hydro, solar or wind",
                other
            )),
        }
    }
}

/// Suffix of right-hand columns while two profiles are summed.
const RHS_SUFFIX: &str = "_rhs";

fn column_id(name: &str) -> Option<usize> {
    name.trim().parse().ok()
}

fn column_name(id: usize) -> String {
    id.to_string()
}

fn series_values(series: &Series) -> Vec<f64> {
    match series.f64() {
        Ok(values) => values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
        Err(_) => Vec::new(),
    }
}

/// Hours x ids matrix: a timestamp index beside a polars [`DataFrame`]
/// holding one `Float64` column per id, named by the id.
///
/// Every column has exactly one value per index entry. Columns are kept in
/// ascending id order.
#[derive(Debug, Clone)]
pub struct Profile {
    index_name: String,
    index: Vec<NaiveDateTime>,
    frame: DataFrame,
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.index_name == other.index_name
            && self.index == other.index
            && self.column_ids().eq(other.column_ids())
            && self.columns().zip(other.columns()).all(|(a, b)| a == b)
    }
}

impl Profile {
    /// A profile with no columns over `index`.
    pub fn new(index_name: impl Into<String>, index: Vec<NaiveDateTime>) -> Self {
        Self {
            index_name: index_name.into(),
            index,
            frame: DataFrame::default(),
        }
    }

    /// A profile with no columns over `hours` consecutive hours from `start`.
    pub fn hourly(index_name: impl Into<String>, start: NaiveDateTime, hours: usize) -> Self {
        let index = (0..hours)
            .map(|h| start + Duration::hours(h as i64))
            .collect();
        Self::new(index_name, index)
    }

    /// Wrap `frame`, whose column names must all be integer ids.
    pub fn from_frame(
        index_name: impl Into<String>,
        index: Vec<NaiveDateTime>,
        frame: DataFrame,
    ) -> Result<Self> {
        let mut profile = Self::new(index_name, index);
        let mut seen = BTreeSet::new();
        for series in frame.get_columns() {
            let id = column_id(series.name())
                .ok_or_else(|| anyhow!("profile column '{}' is not an integer id", series.name()))?;
            if !seen.insert(id) {
                bail!("profile column {} appears twice", id);
            }
            if series.null_count() > 0 {
                bail!("profile column {} has missing values", id);
            }
            let mut values = series
                .cast(&DataType::Float64)
                .with_context(|| format!("casting profile column {} to Float64", id))?;
            values.rename(&column_name(id));
            profile.insert_series(id, values)?;
        }
        Ok(profile)
    }

    /// Same index, no columns.
    pub fn empty_like(&self) -> Self {
        Self::new(self.index_name.clone(), self.index.clone())
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn set_index_name(&mut self, name: impl Into<String>) {
        self.index_name = name.into();
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Number of hours.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    pub fn column_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.frame
            .get_columns()
            .iter()
            .filter_map(|s| column_id(s.name()))
    }

    pub fn columns(&self) -> impl Iterator<Item = (usize, Vec<f64>)> + '_ {
        self.frame
            .get_columns()
            .iter()
            .filter_map(|s| column_id(s.name()).map(|id| (id, series_values(s))))
    }

    pub fn contains(&self, id: usize) -> bool {
        self.frame.column(&column_name(id)).is_ok()
    }

    pub fn column(&self, id: usize) -> Option<Vec<f64>> {
        self.frame.column(&column_name(id)).ok().map(series_values)
    }

    /// Insert or replace column `id`.
    pub fn insert_column(&mut self, id: usize, values: Vec<f64>) -> Result<()> {
        self.insert_series(id, Series::new(&column_name(id), values))
    }

    fn insert_series(&mut self, id: usize, series: Series) -> Result<()> {
        if series.len() != self.index.len() {
            bail!(
                "column {} has {} values but the profile spans {} hours",
                id,
                series.len(),
                self.index.len()
            );
        }
        self.frame
            .with_column(series)
            .with_context(|| format!("inserting profile column {}", id))?;
        self.sort_columns();
        Ok(())
    }

    fn sort_columns(&mut self) {
        let mut columns = self.frame.get_columns().to_vec();
        columns.sort_by_key(|s| column_id(s.name()));
        self.frame = DataFrame::new_no_checks(columns);
    }

    pub fn remove_column(&mut self, id: usize) -> Option<Vec<f64>> {
        self.frame
            .drop_in_place(&column_name(id))
            .ok()
            .map(|s| series_values(&s))
    }

    /// Multiply column `id` by `factor`; returns whether the column exists.
    pub fn scale_column(&mut self, id: usize, factor: f64) -> Result<bool> {
        if !self.contains(id) {
            return Ok(false);
        }
        self.scale_columns(&BTreeMap::from([(id, factor)]))?;
        Ok(true)
    }

    /// Multiply every column by the factor given for its id; columns without
    /// a factor keep their values.
    pub fn scale_columns(&mut self, factors: &BTreeMap<usize, f64>) -> Result<()> {
        let exprs: Vec<Expr> = factors
            .iter()
            .filter(|(id, _)| self.contains(**id))
            .map(|(id, factor)| {
                let name = column_name(*id);
                (col(&name) * lit(*factor)).alias(&name)
            })
            .collect();
        if exprs.is_empty() {
            return Ok(());
        }
        self.frame = self
            .frame
            .clone()
            .lazy()
            .with_columns(exprs)
            .collect()
            .context("scaling profile columns")?;
        Ok(())
    }

    /// Keep only the columns for which `keep` returns true.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let kept: Vec<Series> = self
            .frame
            .get_columns()
            .iter()
            .filter(|s| column_id(s.name()).map_or(false, &mut keep))
            .cloned()
            .collect();
        self.frame = DataFrame::new_no_checks(kept);
    }

    /// A copy restricted to `ids`; ids missing from the profile are an error.
    pub fn select(&self, ids: impl IntoIterator<Item = usize>) -> Result<Profile> {
        let ids: BTreeSet<usize> = ids.into_iter().collect();
        if let Some(missing) = ids.iter().find(|id| !self.contains(**id)) {
            bail!("profile has no column {}", missing);
        }
        let mut out = self.empty_like();
        if ids.is_empty() {
            return Ok(out);
        }
        let exprs: Vec<Expr> = ids.iter().map(|id| col(&column_name(*id))).collect();
        out.frame = self
            .frame
            .clone()
            .lazy()
            .select(exprs)
            .collect()
            .context("selecting profile columns")?;
        Ok(out)
    }

    /// Add `other` column by column. Indices must match; columns only
    /// present in `other` are added as-is.
    pub fn add_assign(&mut self, other: &Profile) -> Result<()> {
        if self.index != other.index {
            bail!(
                "cannot add profiles over different indices ({} vs {} hours)",
                self.index.len(),
                other.index.len()
            );
        }
        let mut rhs = Vec::new();
        let mut sums = Vec::new();
        for series in other.frame.get_columns() {
            let name = series.name();
            if self.frame.column(name).is_ok() {
                let alias = format!("{name}{RHS_SUFFIX}");
                let mut renamed = series.clone();
                renamed.rename(&alias);
                sums.push((col(name) + col(&alias)).alias(name));
                rhs.push(renamed);
            } else {
                self.frame
                    .with_column(series.clone())
                    .with_context(|| format!("adding profile column {}", name))?;
            }
        }
        if !sums.is_empty() {
            let names: Vec<Expr> = self
                .frame
                .get_columns()
                .iter()
                .map(|s| col(s.name()))
                .collect();
            self.frame = self
                .frame
                .hstack(&rhs)
                .context("aligning profiles")?
                .lazy()
                .with_columns(sums)
                .select(names)
                .collect()
                .context("adding profiles")?;
        }
        self.sort_columns();
        Ok(())
    }

    /// Fail unless the index is a strictly hourly sequence without gaps.
    pub fn check_hourly(&self) -> Result<()> {
        let hour = Duration::hours(1);
        for (i, pair) in self.index.windows(2).enumerate() {
            if pair[1] - pair[0] != hour {
                bail!(
                    "profile index is not contiguous hourly: row {} is {} and row {} is {}",
                    i,
                    pair[0],
                    i + 1,
                    pair[1]
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample() -> Profile {
        let mut p = Profile::hourly(PLANT_INDEX, start(), 3);
        p.insert_column(4, vec![1.0, 2.0, 3.0]).unwrap();
        p.insert_column(1, vec![10.0, 20.0, 30.0]).unwrap();
        p
    }

    #[test]
    fn columns_iterate_in_id_order() {
        let p = sample();
        assert_eq!(p.column_ids().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.width(), 2);
    }

    #[test]
    fn insert_rejects_wrong_length() {
        let mut p = sample();
        assert!(p.insert_column(2, vec![1.0]).is_err());
    }

    #[test]
    fn scaling_touches_only_named_columns() {
        let mut p = sample();
        assert!(p.scale_column(4, 2.0).unwrap());
        assert!(!p.scale_column(99, 2.0).unwrap());
        assert_eq!(p.column(4).unwrap(), &[2.0, 4.0, 6.0]);
        assert_eq!(p.column(1).unwrap(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn scale_columns_applies_each_factor_once() {
        let mut p = sample();
        p.scale_columns(&BTreeMap::from([(1, 0.5), (4, 3.0), (9, 2.0)]))
            .unwrap();
        assert_eq!(p.column(1).unwrap(), &[5.0, 10.0, 15.0]);
        assert_eq!(p.column(4).unwrap(), &[3.0, 6.0, 9.0]);
        assert_eq!(p.width(), 2);
    }

    #[test]
    fn retain_and_remove_drop_columns() {
        let mut p = sample();
        p.insert_column(7, vec![0.0; 3]).unwrap();
        p.retain_columns(|id| id != 4);
        assert_eq!(p.column_ids().collect::<Vec<_>>(), vec![1, 7]);
        assert_eq!(p.remove_column(7).unwrap(), vec![0.0; 3]);
        assert!(p.remove_column(7).is_none());
        assert_eq!(p.frame().width(), 1);
    }

    #[test]
    fn frames_with_text_headers_are_rejected() {
        let frame = DataFrame::new(vec![Series::new("solar", vec![1.0, 2.0, 3.0])]).unwrap();
        let index = sample().index().to_vec();
        assert!(Profile::from_frame(PLANT_INDEX, index.clone(), frame).is_err());

        let frame = DataFrame::new(vec![Series::new("12", vec![1i64, 2, 3])]).unwrap();
        let p = Profile::from_frame(PLANT_INDEX, index, frame).unwrap();
        assert_eq!(p.column(12).unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn add_assign_merges_columns() {
        let mut a = sample();
        let mut b = a.empty_like();
        b.insert_column(4, vec![1.0, 1.0, 1.0]).unwrap();
        b.insert_column(7, vec![5.0, 5.0, 5.0]).unwrap();
        a.add_assign(&b).unwrap();
        assert_eq!(a.column(4).unwrap(), &[2.0, 3.0, 4.0]);
        assert_eq!(a.column(7).unwrap(), &[5.0, 5.0, 5.0]);
        assert_eq!(a.column(1).unwrap(), &[10.0, 20.0, 30.0]);
        assert_eq!(a.column_ids().collect::<Vec<_>>(), vec![1, 4, 7]);

        let other = Profile::hourly(PLANT_INDEX, start(), 2);
        assert!(a.add_assign(&other).is_err());
    }

    #[test]
    fn select_requires_every_column() {
        let p = sample();
        let only = p.select([4]).unwrap();
        assert_eq!(only.width(), 1);
        assert_eq!(only.column(4).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(only.len(), 3);
        assert!(p.select([4, 5]).is_err());
    }

    #[test]
    fn gaps_in_the_index_are_detected() {
        assert!(sample().check_hourly().is_ok());
        let index = vec![start(), start() + Duration::hours(2)];
        let p = Profile::new(PLANT_INDEX, index);
        assert!(p.check_hourly().is_err());
    }

    #[test]
    fn kinds_parse_and_label_their_index() {
        assert_eq!("Solar".parse::<ProfileKind>().unwrap(), ProfileKind::Solar);
        assert!("tidal".parse::<ProfileKind>().is_err());
        assert_eq!(ProfileKind::Demand.index_name(), "UTC Time");
        assert_eq!(ProfileKind::Wind.index_name(), "UTC");
        assert!(!ProfileKind::Demand.is_plant_profile());
    }
}
