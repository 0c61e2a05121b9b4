//! CSV form of a [`Profile`].
//!
//! ```text
//! UTC Time,301,308
//! 2016-01-01 00:00:00,1250.5,980.0
//! 2016-01-01 01:00:00,1190.25,955.0
//! ```
//!
//! The first column is the timestamp index, every other header is an
//! integer id. Both directions go through polars' CSV reader and writer.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::ffi::OsStr;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::profile::Profile;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .with_context(|| format!("parsing timestamp '{}'; expected YYYY-MM-DD HH:MM:SS", value))
}

/// Read a profile from any CSV source.
pub fn read_profile<R: Read>(mut reader: R) -> Result<Profile> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .context("reading profile bytes")?;
    let mut frame = CsvReader::new(Cursor::new(bytes))
        .has_header(true)
        .infer_schema(None)
        .finish()
        .context("reading profile CSV")?;

    let first = frame
        .get_column_names()
        .first()
        .map(|name| name.to_string())
        .ok_or_else(|| anyhow!("profile header is empty"))?;
    let index_series = frame
        .drop_in_place(&first)
        .context("splitting off the profile index")?
        .cast(&DataType::Utf8)
        .context("reading the profile index as text")?;
    let index = index_series
        .utf8()?
        .into_iter()
        .enumerate()
        .map(|(row, ts)| {
            let ts = ts.ok_or_else(|| anyhow!("profile row {} has no timestamp", row))?;
            parse_timestamp(ts)
        })
        .collect::<Result<Vec<_>>>()?;

    Profile::from_frame(first.trim(), index, frame)
}

/// Write `profile` as CSV to any sink.
pub fn write_profile<W: Write>(profile: &Profile, writer: W) -> Result<()> {
    let stamps: Vec<String> = profile
        .index()
        .iter()
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .collect();
    let mut columns = vec![Series::new(profile.index_name(), stamps)];
    columns.extend(profile.frame().get_columns().iter().cloned());
    let mut frame = DataFrame::new(columns).context("assembling profile frame")?;
    CsvWriter::new(writer)
        .finish(&mut frame)
        .context("writing profile CSV")
}

pub fn read_profile_csv(path: &Path) -> Result<Profile> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let profile = read_profile(file).with_context(|| format!("reading {}", path.display()))?;
    debug!(
        path = %path.display(),
        hours = profile.len(),
        columns = profile.width(),
        "read profile"
    );
    Ok(profile)
}

/// Write to a staging file next to `path`, then move it into place, so a
/// failed write never leaves a truncated profile behind.
pub fn write_profile_csv(profile: &Profile, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let staged = staged_output_path(path);
    let file =
        fs::File::create(&staged).with_context(|| format!("creating {}", staged.display()))?;
    write_profile(profile, file).with_context(|| format!("writing {}", staged.display()))?;
    fs::rename(&staged, path)
        .with_context(|| format!("moving {} to {}", staged.display(), path.display()))?;
    debug!(path = %path.display(), columns = profile.width(), "wrote profile");
    Ok(())
}

fn staged_output_path(output: &Path) -> PathBuf {
    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    let file_name = output.file_name().unwrap_or_else(|| OsStr::new("profile.csv"));
    let mut staged = OsStr::new(".").to_os_string();
    staged.push(file_name);
    staged.push(".staged");
    parent.join(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DEMAND_INDEX, PLANT_INDEX};
    use tempfile::tempdir;

    const DEMAND: &str = "UTC Time,308,301\n\
        2016-01-01 00:00:00,100.5,20\n\
        2016-01-01 01:00:00,101.25,21\n";

    #[test]
    fn reads_index_name_and_integer_columns() {
        let p = read_profile(DEMAND.as_bytes()).unwrap();
        assert_eq!(p.index_name(), DEMAND_INDEX);
        assert_eq!(p.column_ids().collect::<Vec<_>>(), vec![301, 308]);
        assert_eq!(p.column(308).unwrap(), &[100.5, 101.25]);
        assert_eq!(p.index()[1], parse_timestamp("2016-01-01 01:00:00").unwrap());
    }

    #[test]
    fn file_round_trip_keeps_values() {
        let p = read_profile(DEMAND.as_bytes()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("demand.csv");
        write_profile_csv(&p, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("UTC Time,301,308\n2016-01-01 00:00:00,"));
        assert_eq!(read_profile_csv(&path).unwrap(), p);
        assert!(!staged_output_path(&path).exists());
    }

    #[test]
    fn integer_valued_columns_are_read_as_floats() {
        let text = "UTC,7\n2016-01-01 00:00:00,1\n2016-01-01 01:00:00,2.5\n";
        let p = read_profile(text.as_bytes()).unwrap();
        assert_eq!(p.column(7).unwrap(), &[1.0, 2.5]);
        p.check_hourly().unwrap();
    }

    #[test]
    fn empty_cells_are_rejected() {
        let text = "UTC,7,8\n2016-01-01 00:00:00,1,\n";
        assert!(read_profile(text.as_bytes()).is_err());
    }

    #[test]
    fn non_integer_headers_are_rejected() {
        let text = "UTC,solar\n2016-01-01 00:00:00,1\n";
        assert!(read_profile(text.as_bytes()).is_err());
    }

    #[test]
    fn bad_timestamps_are_rejected() {
        let text = format!("{PLANT_INDEX},1\n2016/01/01 00:00,1\n");
        assert!(read_profile(text.as_bytes()).is_err());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let text = "UTC,1,1\n2016-01-01 00:00:00,1,2\n";
        assert!(read_profile(text.as_bytes()).is_err());
    }
}
