//! The monthly job: runs on the 7th, after the new seasonal forecast is
//! issued, and produces the month's freeze-up forecast from whole-month
//! sources only.

use anyhow::Result;

use crate::cli::create_progress_bar;
use crate::download::fetch_gridded;
use crate::predictors::{
    compute_predictors, forecast_issue_month, Cadence, PREDICTOR_VARIABLES,
};
use crate::reading::gridded::GridSource;
use crate::state::{FsGriddedStore, GriddedStore};

use super::{issue_forecast, DataDirs, RunDate};

pub async fn monthly(run: RunDate) -> Result<String> {
    let dirs = DataDirs::resolve()?;

    let Some(season_year) = run.forecast_year() else {
        println!("nothing to do in May and June");
        return Ok("nothing to do".to_string());
    };

    fetch_sources(&dirs, season_year, run).await?;

    let grids = FsGriddedStore::new(&dirs.grids);
    let set = compute_predictors(&grids, season_year, run.month(), run.day(), Cadence::Monthly)?;

    issue_forecast(&dirs, &set, season_year, run, Cadence::Monthly)
}

/// Fetch whatever whole-month source is due: the reanalysis once the
/// target month has been archived, the fresh seasonal forecast otherwise.
/// Files already on disk are never downloaded again, and a failed download
/// leaves the presence checks unchanged.
async fn fetch_sources(dirs: &DataDirs, season_year: i32, run: RunDate) -> Result<()> {
    let Some(base_url) = DataDirs::source_url() else {
        return Ok(());
    };
    let grids = FsGriddedStore::new(&dirs.grids);

    let bar = create_progress_bar(
        PREDICTOR_VARIABLES.len() as u64,
        "Downloading source extracts...".to_string(),
    );
    for variable in &PREDICTOR_VARIABLES {
        if !grids.has(GridSource::Era5, variable.name, season_year, variable.month, false) {
            if let Err(err) = fetch_gridded(
                &base_url,
                GridSource::Era5,
                variable.name,
                season_year,
                variable.month,
                false,
                &dirs.grids,
            )
            .await
            {
                println!("{} reanalysis not downloaded: {}", variable.name, err);
            }
        }
        if !grids.has(GridSource::Era5, variable.name, season_year, variable.month, false) {
            let issue = forecast_issue_month(variable.month, run.month(), run.day(), Cadence::Monthly);
            if !grids.has(GridSource::Seas51, variable.name, season_year, issue, false) {
                if let Err(err) = fetch_gridded(
                    &base_url,
                    GridSource::Seas51,
                    variable.name,
                    season_year,
                    issue,
                    false,
                    &dirs.grids,
                )
                .await
                {
                    println!("{} seasonal forecast not downloaded: {}", variable.name, err);
                }
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("Source extracts downloaded");

    Ok(())
}
