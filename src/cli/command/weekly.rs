//! The weekly job: refresh the month in progress with partial reanalysis,
//! blend it into the running seasonal forecast and reissue the freeze-up
//! forecast. In the dead period between seasons it only resets the frozen
//! flag.

use anyhow::Result;

use crate::cli::create_progress_bar;
use crate::download::{fetch_gridded, partial_action, remove_stale_partial, PartialAction};
use crate::predictors::{compute_predictors, Cadence, PREDICTOR_VARIABLES};
use crate::reading::gridded::GridSource;
use crate::state::{FsGriddedStore, FsStorage, SeasonState};

use super::{issue_forecast, DataDirs, RunDate};

pub async fn weekly(run: RunDate) -> Result<String> {
    let dirs = DataDirs::resolve()?;
    let storage = FsStorage::new(&dirs.data);

    let Some(season_year) = run.forecast_year() else {
        // the dead period is the only place the frozen flag is cleared
        let mut state = SeasonState::load(&storage)?;
        if state.frozen {
            state.frozen = false;
            state.save(&storage)?;
            println!("frozen flag reset for the coming season");
        }
        println!("nothing to do in May and June");
        return Ok("nothing to do".to_string());
    };
    if run.month() == 7 && run.day() < 7 {
        println!("no weekly forecast before the first monthly forecast of the season");
        return Ok("nothing to do".to_string());
    }

    maintain_partials(&dirs, season_year, run).await?;

    let grids = FsGriddedStore::new(&dirs.grids);
    let set = compute_predictors(&grids, season_year, run.month(), run.day(), Cadence::Weekly)?;

    issue_forecast(&dirs, &set, season_year, run, Cadence::Weekly)
}

/// Keep the partial reanalysis extracts in step with the calendar: fetch
/// them while they can still improve the forecast, drop them once the full
/// month supersedes them. Download failures only cost this week's refresh.
async fn maintain_partials(dirs: &DataDirs, season_year: i32, run: RunDate) -> Result<()> {
    let Some(base_url) = DataDirs::source_url() else {
        return Ok(());
    };

    let bar = create_progress_bar(
        PREDICTOR_VARIABLES.len() as u64,
        "Refreshing partial reanalysis...".to_string(),
    );
    for variable in &PREDICTOR_VARIABLES {
        match partial_action(variable.month, run.month(), run.day()) {
            PartialAction::Fetch => {
                if let Err(err) = fetch_gridded(
                    &base_url,
                    GridSource::Era5,
                    variable.name,
                    season_year,
                    variable.month,
                    true,
                    &dirs.grids,
                )
                .await
                {
                    println!("{} partial reanalysis not downloaded: {}", variable.name, err);
                }
            }
            PartialAction::Remove => {
                remove_stale_partial(
                    &dirs.grids,
                    GridSource::Era5,
                    variable.name,
                    season_year,
                    variable.month,
                )?;
            }
            PartialAction::Leave => {}
        }
        bar.inc(1);
    }
    bar.finish_with_message("Source extracts refreshed");

    Ok(())
}
