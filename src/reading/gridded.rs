//! Typed gridded source variables in canonical Celsius/date form.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;

const KELVIN_OFFSET: f64 = 273.15;

/// The two upstream gridded products: the observational reanalysis and the
/// ensemble seasonal forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridSource {
    Era5,
    Seas51,
}

impl GridSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridSource::Era5 => "ERA5",
            GridSource::Seas51 => "SEAS51",
        }
    }
}

/// File name of an area-averaged source extract for one variable and month.
/// Presence of the file doubles as the availability signal between jobs.
pub fn grid_file_name(
    source: GridSource,
    variable: &str,
    year: i32,
    month: u32,
    partial: bool,
) -> String {
    let suffix = if partial { ".partial" } else { "" };
    format!(
        "{}_{:04}{:02}_{}{}.parquet",
        source.as_str(),
        year,
        month,
        variable,
        suffix
    )
}

/// One variable of one source month, area-averaged to a daily axis and
/// converted to canonical units at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedVariable {
    pub name: String,
    pub unit: String,
    pub times: Vec<NaiveDate>,
    /// Ensemble member ids as delivered by the source; empty for
    /// observational data.
    pub members: Vec<u32>,
    /// One row of values per member; a single row when `members` is empty.
    pub values: Vec<Vec<f64>>,
}

impl GriddedVariable {
    pub fn new(
        name: String,
        unit: String,
        times: Vec<NaiveDate>,
        members: Vec<u32>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let rows = if members.is_empty() { 1 } else { members.len() };
        if values.len() != rows {
            bail!(
                "{}: {} value rows for {} members",
                name,
                values.len(),
                rows
            );
        }
        for row in &values {
            if row.len() != times.len() {
                bail!("{}: value row length does not match the time axis", name);
            }
        }
        if times.windows(2).any(|pair| pair[0] >= pair[1]) {
            bail!("{}: time axis is not strictly ascending", name);
        }

        let mut variable = GriddedVariable {
            name,
            unit,
            times,
            members,
            values,
        };
        variable.normalise_units();

        Ok(variable)
    }

    pub fn is_ensemble(&self) -> bool {
        !self.members.is_empty()
    }

    /// Index of `date` on the time axis.
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.times.binary_search(&date).ok()
    }

    // Kelvin extracts are converted once here; everything downstream works
    // in Celsius.
    fn normalise_units(&mut self) {
        if self.unit == "K" {
            for row in &mut self.values {
                for value in row.iter_mut() {
                    *value -= KELVIN_OFFSET;
                }
            }
            self.unit = "C".to_string();
        }
    }

    /// Read a raw source extract as delivered in a download bundle: CSV with
    /// header `time,number,value,unit`, `number` empty for observational
    /// data, `unit` constant across rows.
    pub fn from_csv_file(name: &str, path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

        let mut unit: Option<String> = None;
        let mut rows: BTreeMap<Option<u32>, Vec<(NaiveDate, f64)>> = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            if record.len() != 4 {
                bail!(
                    "{}: expected 4 fields per row, got {}",
                    path.display(),
                    record.len()
                );
            }
            let time: NaiveDate = record.get(0).unwrap().trim().parse()?;
            let member = match record.get(1).unwrap().trim() {
                "" => None,
                text => Some(text.parse::<u32>()?),
            };
            let value: f64 = record.get(2).unwrap().trim().parse()?;
            let row_unit = record.get(3).unwrap().trim();
            match &unit {
                None => unit = Some(row_unit.to_string()),
                Some(seen) if seen != row_unit => {
                    bail!("{}: mixed units {} and {}", path.display(), seen, row_unit)
                }
                _ => {}
            }
            rows.entry(member).or_default().push((time, value));
        }
        let unit = unit.ok_or_else(|| anyhow!("{}: no data rows", path.display()))?;

        if rows.keys().any(|member| member.is_none()) && rows.len() > 1 {
            bail!(
                "{}: mixes observational and ensemble rows",
                path.display()
            );
        }

        let mut times: Option<Vec<NaiveDate>> = None;
        let mut members = Vec::new();
        let mut values = Vec::new();
        for (member, mut series) in rows {
            series.sort_by_key(|(time, _)| *time);
            let row_times: Vec<NaiveDate> = series.iter().map(|(time, _)| *time).collect();
            match &times {
                None => times = Some(row_times),
                Some(axis) if *axis != row_times => {
                    bail!("{}: ensemble members disagree on the time axis", path.display())
                }
                _ => {}
            }
            if let Some(id) = member {
                members.push(id);
            }
            values.push(series.into_iter().map(|(_, value)| value).collect());
        }

        GriddedVariable::new(
            name.to_string(),
            unit,
            times.unwrap_or_default(),
            members,
            values,
        )
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Write;

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, month, day).unwrap()
    }

    #[test]
    fn should_build_grid_file_names() {
        assert_eq!(
            grid_file_name(GridSource::Era5, "2m_temperature", 2023, 12, false),
            "ERA5_202312_2m_temperature.parquet"
        );
        assert_eq!(
            grid_file_name(GridSource::Era5, "snowfall", 2023, 11, true),
            "ERA5_202311_snowfall.partial.parquet"
        );
        assert_eq!(
            grid_file_name(GridSource::Seas51, "total_cloud_cover", 2023, 9, false),
            "SEAS51_202309_total_cloud_cover.parquet"
        );
    }

    #[test]
    fn should_convert_kelvin_to_celsius() {
        let variable = GriddedVariable::new(
            "2m_temperature".to_string(),
            "K".to_string(),
            vec![date(12, 1), date(12, 2)],
            vec![],
            vec![vec![273.15, 274.15]],
        )
        .unwrap();

        assert_eq!(variable.unit, "C");
        assert_eq!(variable.values[0], vec![0.0, 1.0]);
    }

    #[test]
    fn should_reject_ragged_rows() {
        let result = GriddedVariable::new(
            "snowfall".to_string(),
            "m".to_string(),
            vec![date(11, 1), date(11, 2)],
            vec![1, 2],
            vec![vec![0.1, 0.2], vec![0.3]],
        );

        assert!(result.is_err());
    }

    #[test]
    fn should_read_ensemble_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,number,value,unit").unwrap();
        writeln!(file, "2023-11-02,0,274.15,K").unwrap();
        writeln!(file, "2023-11-03,0,275.15,K").unwrap();
        writeln!(file, "2023-11-02,1,273.15,K").unwrap();
        writeln!(file, "2023-11-03,1,274.15,K").unwrap();

        let variable =
            GriddedVariable::from_csv_file("2m_temperature", file.path()).unwrap();

        assert_eq!(variable.members, vec![0, 1]);
        assert_eq!(variable.times, vec![date(11, 2), date(11, 3)]);
        assert_eq!(variable.unit, "C");
        assert_eq!(variable.values[0], vec![1.0, 2.0]);
        assert_eq!(variable.values[1], vec![0.0, 1.0]);
    }

    #[test]
    fn should_read_observational_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,number,value,unit").unwrap();
        writeln!(file, "2023-09-01,,0.25,frac").unwrap();
        writeln!(file, "2023-09-02,,0.75,frac").unwrap();

        let variable =
            GriddedVariable::from_csv_file("total_cloud_cover", file.path()).unwrap();

        assert!(!variable.is_ensemble());
        assert_eq!(variable.values, vec![vec![0.25, 0.75]]);
    }
}
