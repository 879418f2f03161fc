//! Minute-resolution thermistor batch files transferred from the plant.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};

use crate::series::DailySeries;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker the datalogger writes for an unusable reading.
const BAD_VALUE: &str = "Bad";

/// One raw instrument sample. The temperature is missing when the logger
/// flagged the reading as bad or when a whole file had to be skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
}

impl RawSample {
    /// Parse one datalogger row. Rows carry five or six comma-separated
    /// fields; only the timestamp (field 0) and the sample (field 2) are
    /// consumed.
    pub fn from_record(record: &StringRecord) -> Result<Self> {
        if record.len() < 3 {
            bail!("thermistor row has {} fields, expected at least 3", record.len());
        }
        let timestamp =
            NaiveDateTime::parse_from_str(record.get(0).unwrap().trim(), TIMESTAMP_FORMAT)?;
        let raw = record.get(2).unwrap().trim();
        let temperature = if raw == BAD_VALUE {
            None
        } else {
            Some(raw.parse::<f64>()?)
        };

        Ok(RawSample {
            timestamp,
            temperature,
        })
    }
}

/// Name of the `index`-th raw batch file in the thermistor directory.
pub fn batch_file_name(index: u64) -> String {
    format!("station_{}.dat", index)
}

/// Read one batch file into ascending samples. Any malformed row fails the
/// whole file; the caller decides how to keep the series continuous.
pub fn read_batch_file(path: &Path) -> Result<Vec<RawSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut samples = Vec::new();
    for record in reader.records() {
        samples.push(RawSample::from_record(&record?)?);
    }
    if samples.is_empty() {
        bail!("no samples in {}", path.display());
    }
    samples.sort_by_key(|sample| sample.timestamp);

    Ok(samples)
}

/// Collapse minute samples into daily means. A day whose samples are all
/// missing stays on the axis as a missing day.
pub fn daily_average(samples: &[RawSample]) -> DailySeries {
    let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        let entry = days.entry(sample.timestamp.date()).or_default();
        if let Some(value) = sample.temperature {
            entry.push(value);
        }
    }

    let points = days
        .into_iter()
        .map(|(date, values)| {
            let mean = if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            };
            (date, mean)
        })
        .collect();

    DailySeries::from_points(points)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn should_parse_sample_row() {
        let sample =
            RawSample::from_record(&record(&["2024-12-18 14:03:00", "221", "1.375", "0", "12.1"]))
                .unwrap();

        assert_eq!(
            sample.timestamp,
            NaiveDateTime::parse_from_str("2024-12-18 14:03:00", TIMESTAMP_FORMAT).unwrap()
        );
        assert_eq!(sample.temperature, Some(1.375));
    }

    #[test]
    fn should_map_bad_reading_to_missing() {
        let sample =
            RawSample::from_record(&record(&["2024-12-18 14:04:00", "221", "Bad", "0", "12.1"]))
                .unwrap();

        assert_eq!(sample.temperature, None);
    }

    #[test]
    fn should_reject_malformed_row() {
        assert!(RawSample::from_record(&record(&["2024-12-18 14:04:00"])).is_err());
        assert!(RawSample::from_record(&record(&["not a date", "221", "1.0"])).is_err());
        assert!(RawSample::from_record(&record(&["2024-12-18 14:04:00", "221", "1.2.3"])).is_err());
    }

    #[test]
    fn should_average_per_day() {
        let t = |s: &str| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap();
        let samples = vec![
            RawSample {
                timestamp: t("2024-12-18 00:01:00"),
                temperature: Some(1.0),
            },
            RawSample {
                timestamp: t("2024-12-18 12:01:00"),
                temperature: Some(3.0),
            },
            RawSample {
                timestamp: t("2024-12-19 00:01:00"),
                temperature: None,
            },
        ];

        let series = daily_average(&samples);

        assert_eq!(series.len(), 2);
        assert_eq!(
            series.get(NaiveDate::from_ymd_opt(2024, 12, 18).unwrap()),
            Some(2.0)
        );
        assert_eq!(
            series.get(NaiveDate::from_ymd_opt(2024, 12, 19).unwrap()),
            None
        );
    }
}
