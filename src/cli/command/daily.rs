//! The daily job: ingest new thermistor batches into the daily store and
//! run the operational freeze check.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};

use crate::cli::create_spinner;
use crate::forecast::select_authoritative;
use crate::freeze::{self, extended_doy, FreezeUpRecord, SeasonWindow};
use crate::predictors::Cadence;
use crate::qc;
use crate::reading::thermistor::{batch_file_name, daily_average, read_batch_file, RawSample};
use crate::series::DailySeries;
use crate::state::{FsStorage, SeasonState};
use crate::store::forecast_log::{read_log, ForecastRow};
use crate::store::series::{load_series, save_series};

use super::{DataDirs, RunDate};

pub async fn daily(run: RunDate) -> Result<String> {
    let dirs = DataDirs::resolve()?;
    let storage = FsStorage::new(&dirs.data);
    let mut state = SeasonState::load(&storage)?;

    let series_path = dirs.series_path();
    let mut series = if series_path.is_file() {
        load_series(&series_path)?
    } else {
        DailySeries::new()
    };

    // only complete days enter the store, so the run needs at least one
    // full day not yet covered
    let yesterday = run.date.pred_opt().context("date underflow")?;
    if let Some(last) = series.last_date() {
        if last >= yesterday {
            println!("no full day of temperature data to add since {}", last);
            return Ok("nothing to do".to_string());
        }
    }

    let cutoff = yesterday.and_hms_opt(23, 59, 59).unwrap();
    let mut samples = ingest_batches(&dirs.thermistor, &mut state, cutoff)?;
    if samples.is_empty() {
        println!("no new thermistor batches at index {}", state.next_index);
        return Ok("nothing to do".to_string());
    }

    let bar = create_spinner(format!("Processing {} raw samples...", samples.len()));
    qc::smooth_raw_samples(&mut samples);
    let update = daily_average(&samples);
    let update = DailySeries::from_points(
        update
            .points()
            .iter()
            .filter(|(date, _)| *date <= yesterday)
            .copied()
            .collect(),
    );
    series.merge(&update);
    series.densify();
    save_series(&series, &series_path)?;
    state.save(&storage)?;
    bar.finish_with_message("Daily series updated");

    if let Some((date, Some(value))) = series.last_point() {
        if freeze::update_freeze_state(&mut state, date, value) {
            state.save(&storage)?;
            println!("river classified frozen on {}", date);
        }
    }

    report_season(&dirs, &state, run);

    Ok(format!(
        "daily update complete, next batch index {}",
        state.next_index
    ))
}

/// Consume batch files from the resume marker onward. A malformed file
/// contributes one missing sample an hour after the last good timestamp so
/// the series stays continuous; a file reaching past the cutoff is left for
/// tomorrow's run.
fn ingest_batches(
    dir: &Path,
    state: &mut SeasonState,
    cutoff: NaiveDateTime,
) -> Result<Vec<RawSample>> {
    let mut samples: Vec<RawSample> = Vec::new();
    let mut index = state.next_index;

    loop {
        let path = dir.join(batch_file_name(index));
        if !path.is_file() {
            break;
        }
        let batch = match read_batch_file(&path) {
            Ok(batch) => batch,
            Err(err) => {
                eprintln!("substituting a missing sample for {}: {}", path.display(), err);
                match samples.last() {
                    Some(last) => vec![RawSample {
                        timestamp: last.timestamp + Duration::hours(1),
                        temperature: None,
                    }],
                    None => {
                        index += 1;
                        continue;
                    }
                }
            }
        };
        if let Some(last) = batch.last() {
            if last.timestamp > cutoff {
                break;
            }
        }
        samples.extend(batch);
        index += 1;
    }

    state.next_index = index;

    Ok(samples)
}

/// Print the state of the current season: frozen since when, or the
/// authoritative forecast (the later-issued of the weekly and monthly
/// logs).
fn report_season(dirs: &DataDirs, state: &SeasonState, run: RunDate) {
    let season = SeasonWindow::containing(run.date);
    let mut record = FreezeUpRecord::unresolved(season.start_year);
    record.is_frozen = state.frozen;
    record.observed_date = state.frozen_date;
    record.observed_doy = state
        .frozen_date
        .map(|date| extended_doy(date, season.start_year));

    let weekly = read_log_if_present(dirs, season.start_year, Cadence::Weekly);
    let monthly = read_log_if_present(dirs, season.start_year, Cadence::Monthly);
    if let Some(row) = select_authoritative(&weekly, &monthly) {
        record.forecast_doy = Some(row.fud);
        record.forecast_date = freeze::doy_to_date(row.fud as f64, season.start_year);
    }

    match (record.is_frozen, record.observed_date, record.forecast_date) {
        (true, Some(date), _) => println!("season {}: frozen since {}", season.label(), date),
        (false, _, Some(date)) => println!(
            "season {}: open water, freeze-up forecast {}",
            season.label(),
            date
        ),
        _ => println!(
            "season {}: open water, no forecast issued yet",
            season.label()
        ),
    }
}

fn read_log_if_present(dirs: &DataDirs, season_year: i32, cadence: Cadence) -> Vec<ForecastRow> {
    let path = dirs.forecast_log_path(season_year, cadence);
    if !path.is_file() {
        return Vec::new();
    }
    match read_log(&path) {
        Ok(rows) => rows,
        Err(err) => {
            eprintln!("ignoring {}: {}", path.display(), err);
            Vec::new()
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    fn cutoff(date: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn state() -> SeasonState {
        SeasonState {
            frozen: false,
            frozen_date: None,
            next_index: 0,
        }
    }

    #[test]
    fn should_consume_batches_up_to_cutoff() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("station_0.dat"),
            "\"2024-12-18 10:00:00\",\"221\",\"1.2\",\"0\",\"12\"\n\
             \"2024-12-18 10:01:00\",\"221\",\"1.3\",\"0\",\"12\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("station_1.dat"), "garbage without commas\n").unwrap();
        fs::write(
            dir.path().join("station_2.dat"),
            "\"2024-12-18 12:00:00\",\"221\",\"1.4\",\"0\",\"12\"\n",
        )
        .unwrap();
        // reaches past the cutoff: must not be consumed
        fs::write(
            dir.path().join("station_3.dat"),
            "\"2024-12-19 00:30:00\",\"221\",\"1.5\",\"0\",\"12\"\n",
        )
        .unwrap();

        let mut state = state();
        let samples =
            ingest_batches(dir.path(), &mut state, cutoff("2024-12-18 23:59:59")).unwrap();

        assert_eq!(state.next_index, 3);
        assert_eq!(samples.len(), 4);
        // the malformed file became one missing sample an hour later
        assert_eq!(
            samples[2].timestamp,
            cutoff("2024-12-18 11:01:00")
        );
        assert_eq!(samples[2].temperature, None);
        assert_eq!(samples[3].temperature, Some(1.4));
    }

    #[test]
    fn should_reingest_idempotently() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("station_0.dat"),
            "\"2024-12-18 10:00:00\",\"221\",\"1.2\",\"0\",\"12\"\n",
        )
        .unwrap();

        let mut first_state = state();
        let first =
            ingest_batches(dir.path(), &mut first_state, cutoff("2024-12-18 23:59:59")).unwrap();

        // a rerun from the same marker sees the same data
        let mut second_state = state();
        let second =
            ingest_batches(dir.path(), &mut second_state, cutoff("2024-12-18 23:59:59")).unwrap();
        assert_eq!(first, second);

        // a run from the advanced marker consumes nothing
        let mut advanced = first_state;
        let rest =
            ingest_batches(dir.path(), &mut advanced, cutoff("2024-12-18 23:59:59")).unwrap();
        assert!(rest.is_empty());
        assert_eq!(advanced.next_index, 1);
    }

    #[test]
    fn should_merge_daily_updates_without_duplicates() {
        let day = |d: u32| NaiveDate::from_ymd_opt(2024, 12, d).unwrap();
        let mut store = DailySeries::from_points(vec![(day(16), Some(1.5)), (day(17), Some(1.2))]);
        let update = DailySeries::from_points(vec![(day(17), Some(1.1)), (day(18), Some(0.9))]);

        store.merge(&update);
        store.densify();
        let once = store.clone();
        store.merge(&update);

        assert_eq!(store, once);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(day(17)), Some(1.1));
    }
}
