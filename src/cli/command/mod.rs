pub mod daily;
pub mod monthly;
pub mod weekly;
pub mod yearly;

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate};

pub use daily::daily;
pub use monthly::monthly;
pub use weekly::weekly;
pub use yearly::yearly;

use crate::forecast::run_forecast;
use crate::freeze::doy_to_date;
use crate::predictors::{Cadence, PredictorSet};
use crate::store::forecast_log::{append_rows, log_file_name};
use crate::store::predictor_table::load_table;

/// Root of the on-disk data tree; defaults to `~/.freezeup`.
pub const DATA_ENV: &str = "FREEZEUP_DATA";
/// Directory the plant drops raw thermistor batches into.
pub const THERMISTOR_ENV: &str = "FREEZEUP_THERMISTOR";
/// Base URL the gridded source bundles are fetched from; downloads are
/// skipped entirely when unset.
pub const SOURCE_URL_ENV: &str = "FREEZEUP_SOURCE_URL";

/// The calendar date a job run is anchored to. Cron runs use today; reruns
/// and tests pin it with `--date`.
#[derive(Debug, Clone, Copy)]
pub struct RunDate {
    pub date: NaiveDate,
}

impl RunDate {
    pub fn resolve(date: Option<NaiveDate>) -> Self {
        RunDate {
            date: date.unwrap_or_else(|| Local::now().date_naive()),
        }
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    /// The season a forecast issued now belongs to. January to April still
    /// work on the season that started last year; May and June are the dead
    /// period between seasons.
    pub fn forecast_year(&self) -> Option<i32> {
        match self.month() {
            1..=4 => Some(self.year() - 1),
            5 | 6 => None,
            _ => Some(self.year()),
        }
    }
}

/// Layout of the data tree shared by all jobs.
pub struct DataDirs {
    pub data: PathBuf,
    pub thermistor: PathBuf,
    pub grids: PathBuf,
}

impl DataDirs {
    pub fn resolve() -> Result<Self> {
        let data = match env::var(DATA_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => dirs::home_dir()
                .context("no home directory")?
                .join(".freezeup"),
        };
        let thermistor = env::var(THERMISTOR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| data.join("thermistor"));
        let grids = data.join("grids");
        fs::create_dir_all(&data).with_context(|| format!("creating {}", data.display()))?;
        fs::create_dir_all(&grids).with_context(|| format!("creating {}", grids.display()))?;

        Ok(DataDirs {
            data,
            thermistor,
            grids,
        })
    }

    pub fn series_path(&self) -> PathBuf {
        self.data.join("twater.parquet")
    }

    pub fn preprocessed_path(&self) -> PathBuf {
        self.data.join("twater_preprocessed.parquet")
    }

    pub fn predictor_table_path(&self) -> PathBuf {
        self.data.join("monthly_predictors.parquet")
    }

    pub fn forecast_log_path(&self, season_year: i32, cadence: Cadence) -> PathBuf {
        self.data.join(log_file_name(season_year, cadence))
    }

    pub fn source_url() -> Option<String> {
        env::var(SOURCE_URL_ENV).ok()
    }
}

/// Fit, predict and append to the season's log; shared by the weekly and
/// monthly jobs.
pub(crate) fn issue_forecast(
    dirs: &DataDirs,
    set: &PredictorSet,
    season_year: i32,
    run: RunDate,
    cadence: Cadence,
) -> Result<String> {
    let table = load_table(&dirs.predictor_table_path())?;
    let rows = run_forecast(&table, set, run.date)?;
    let path = dirs.forecast_log_path(season_year, cadence);
    append_rows(&path, &rows)?;

    let mean = rows[0];
    match doy_to_date(mean.fud as f64, season_year) {
        Some(date) => println!(
            "the forecasted freeze-up is {} (day {} of the year)",
            date, mean.fud
        ),
        None => println!("the forecasted freeze-up is day {} of the year", mean.fud),
    }

    Ok(format!(
        "{} forecast appended to {}",
        cadence.log_suffix(),
        path.display()
    ))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn run_on(year: i32, month: u32, day: u32) -> RunDate {
        RunDate {
            date: NaiveDate::from_ymd_opt(year, month, day).unwrap(),
        }
    }

    #[test]
    fn should_keep_season_year_through_spring() {
        assert_eq!(run_on(2023, 12, 4).forecast_year(), Some(2023));
        assert_eq!(run_on(2024, 1, 8).forecast_year(), Some(2023));
        assert_eq!(run_on(2024, 4, 29).forecast_year(), Some(2023));
    }

    #[test]
    fn should_mark_dead_period() {
        assert_eq!(run_on(2024, 5, 13).forecast_year(), None);
        assert_eq!(run_on(2024, 6, 30).forecast_year(), None);
        assert_eq!(run_on(2024, 7, 1).forecast_year(), Some(2024));
    }
}
