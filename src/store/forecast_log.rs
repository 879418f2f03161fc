//! The append-only per-season forecast log: `time,number,FUD` rows, one
//! file per season and cadence, member number 0 reserved for the ensemble
//! mean. Rows are appended and never rewritten.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};

use crate::predictors::{Cadence, ForecastMember};

const HEADER: [&str; 3] = ["time", "number", "FUD"];

/// One issued forecast value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastRow {
    pub issued: NaiveDate,
    pub member: ForecastMember,
    pub fud: i64,
}

/// `<year>FUDweekly` / `<year>FUDmonthly`.
pub fn log_file_name(season_year: i32, cadence: Cadence) -> String {
    format!("{}FUD{}", season_year, cadence.log_suffix())
}

/// Append rows, creating the file with its header on first write.
pub fn append_rows(path: &Path, rows: &[ForecastRow]) -> Result<()> {
    let existed = path.is_file();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

    if !existed {
        writer.write_record(HEADER)?;
    }
    for row in rows {
        writer.write_record([
            row.issued.format("%Y-%m-%d").to_string(),
            row.member.number().to_string(),
            row.fud.to_string(),
        ])?;
    }
    writer.flush()?;

    Ok(())
}

pub fn read_log(path: &Path) -> Result<Vec<ForecastRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers = reader.headers()?.clone();
    if headers.iter().collect::<Vec<_>>() != HEADER {
        bail!("{}: unexpected header {:?}", path.display(), headers);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 3 {
            bail!("{}: malformed row {:?}", path.display(), record);
        }
        let issued: NaiveDate = record.get(0).unwrap().trim().parse()?;
        let number: u32 = record.get(1).unwrap().trim().parse()?;
        let fud: i64 = record.get(2).unwrap().trim().parse()?;
        rows.push(ForecastRow {
            issued,
            member: ForecastMember::from_number(number),
            fud,
        });
    }

    Ok(rows)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn should_build_log_file_names() {
        assert_eq!(log_file_name(2023, Cadence::Weekly), "2023FUDweekly");
        assert_eq!(log_file_name(2023, Cadence::Monthly), "2023FUDmonthly");
    }

    #[test]
    fn should_round_trip_rows_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(log_file_name(2023, Cadence::Weekly));
        let day = |d: u32| NaiveDate::from_ymd_opt(2023, 12, d).unwrap();
        let first = vec![
            ForecastRow { issued: day(4), member: ForecastMember::Mean, fud: 361 },
            ForecastRow { issued: day(4), member: ForecastMember::Numbered(1), fud: 359 },
        ];
        let second = vec![
            ForecastRow { issued: day(11), member: ForecastMember::Mean, fud: 358 },
        ];

        append_rows(&path, &first).unwrap();
        append_rows(&path, &second).unwrap();
        let rows = read_log(&path).unwrap();

        let mut expected = first;
        expected.extend(second);
        assert_eq!(rows, expected);

        // the file keeps its single header line
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("time,number,FUD\n"));
        assert_eq!(text.matches("time,number,FUD").count(), 1);
        assert!(text.contains("2023-12-04,0,361"));
    }

    #[test]
    fn should_reject_foreign_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("2023FUDweekly");
        std::fs::write(&path, "a,b,c\n2023-12-04,0,361\n").unwrap();

        assert!(read_log(&path).is_err());
    }
}
