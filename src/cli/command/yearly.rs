//! The yearly job, run in June once the season is over: quality-control the
//! full temperature record, derive the freeze-up history and rebuild the
//! predictor table the forecasts fit against.

use anyhow::{bail, Result};

use crate::cli::create_spinner;
use crate::freeze::{climatological_freeze_doy, extract_freeze_up_dates, FreezeUpRecord};
use crate::predictors::{aggregate_observational, PREDICTOR_VARIABLES};
use crate::qc;
use crate::reading::gridded::GridSource;
use crate::state::{FsGriddedStore, GriddedStore};
use crate::store::predictor_table::{save_table, PredictorTable};
use crate::store::series::{load_series, save_preprocessed};

use super::{DataDirs, RunDate};

pub async fn yearly(run: RunDate) -> Result<String> {
    // this job rewrites the season history; running it outside its slot is
    // a misconfigured scheduler, not a soft skip
    if run.month() != 6 {
        bail!(
            "the yearly preprocessing runs in June; refusing to run in month {}",
            run.month()
        );
    }

    let dirs = DataDirs::resolve()?;
    let raw = load_series(&dirs.series_path())?;

    let bar = create_spinner("Running quality control...".to_string());
    let output = qc::run_pipeline(&raw);
    let mut raw_dense = raw.clone();
    raw_dense.densify();
    save_preprocessed(
        &raw_dense,
        &output.processed,
        &output.offset,
        &output.no_offset,
        &dirs.preprocessed_path(),
    )?;
    bar.finish_with_message("Quality control complete");

    let records = extract_freeze_up_dates(&output.no_offset);
    let observed = records.iter().filter(|record| record.is_frozen).count();
    println!(
        "{} seasons processed, {} with an observed freeze-up",
        records.len(),
        observed
    );
    if let Some(doy) = climatological_freeze_doy(&records) {
        println!("climatological freeze-up: day {} of the year", doy);
    }

    let grids = FsGriddedStore::new(&dirs.grids);
    let table = build_predictor_table(&grids, &records)?;
    save_table(&table, &dirs.predictor_table_path())?;
    println!("predictor history rebuilt for {} seasons", table.len());

    Ok(format!(
        "yearly preprocessing complete: {} seasons",
        records.len()
    ))
}

/// One table row per season whose three reanalysis months are all on disk;
/// the common period of the freeze-up history and the archived predictors.
fn build_predictor_table(
    store: &dyn GriddedStore,
    records: &[FreezeUpRecord],
) -> Result<PredictorTable> {
    let mut table = PredictorTable::default();
    for record in records {
        let mut values = Vec::with_capacity(PREDICTOR_VARIABLES.len());
        for variable in &PREDICTOR_VARIABLES {
            if !store.has(GridSource::Era5, variable.name, record.season, variable.month, false) {
                break;
            }
            let grid =
                store.load(GridSource::Era5, variable.name, record.season, variable.month, false)?;
            values.push(aggregate_observational(&grid, variable.method));
        }
        if values.len() == PREDICTOR_VARIABLES.len() {
            table.push(
                record.season,
                values[0],
                values[1],
                values[2],
                record.observed_doy.map(|doy| doy as f64),
            );
        }
    }

    if table.is_empty() {
        bail!("no reanalysis data found to build the predictor history");
    }

    Ok(table)
}

// -- Tests -------------------------------------------------------------------
