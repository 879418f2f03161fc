//! Downloads raw source bundles and converts them into the canonical
//! gridded store.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use futures::StreamExt;
use tar::Archive;
use tempfile::TempDir;

use crate::reading::gridded::{grid_file_name, GridSource, GriddedVariable};
use crate::store::gridded::save_gridded;

/// Bounded retry count for a single file.
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Download a file. A failed attempt removes the partial file before the
/// retry, so a later presence check can never mistake a truncated download
/// for complete data.
pub async fn download_file(url: &str, file_path: &Path) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match try_download(url, file_path).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if file_path.is_file() {
                    let _ = fs::remove_file(file_path);
                }
                eprintln!(
                    "download attempt {}/{} failed for {}: {}",
                    attempt, DOWNLOAD_ATTEMPTS, url, err
                );
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap())
}

async fn try_download(url: &str, file_path: &Path) -> Result<()> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        bail!("{} answered {}", url, response.status());
    }

    let mut file =
        File::create(file_path).with_context(|| format!("creating {}", file_path.display()))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?)?;
    }

    Ok(())
}

/// Extract a `.tar.gz` bundle into the working directory.
pub fn extract_archive(archive_path: &Path, working_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let tar = GzDecoder::new(file);
    let mut archive = Archive::new(tar);
    archive.unpack(working_dir)?;

    Ok(())
}

/// Fetch one source month: download the bundle, extract it and convert the
/// raw CSV extract into the parquet file the aggregation layer reads. Only
/// a fully converted file ever lands in the grids directory.
pub async fn fetch_gridded(
    base_url: &str,
    source: GridSource,
    variable: &str,
    year: i32,
    month: u32,
    partial: bool,
    grids_dir: &Path,
) -> Result<()> {
    let suffix = if partial { ".partial" } else { "" };
    let stem = format!(
        "{}_{:04}{:02}_{}{}",
        source.as_str(),
        year,
        month,
        variable,
        suffix
    );
    let url = format!("{}/{}.tar.gz", base_url.trim_end_matches('/'), stem);

    let tmp = TempDir::new()?;
    let archive_path = tmp.path().join(format!("{}.tar.gz", stem));
    download_file(&url, &archive_path).await?;
    extract_archive(&archive_path, tmp.path())?;

    let csv_path = tmp.path().join(format!("{}.csv", stem));
    if !csv_path.is_file() {
        bail!("bundle {} did not contain {}.csv", url, stem);
    }
    let grid = GriddedVariable::from_csv_file(variable, &csv_path)?;
    let target = grids_dir.join(grid_file_name(source, variable, year, month, partial));
    save_gridded(&grid, &target)?;

    Ok(())
}

/// What the weekly job should do about a variable's partial reanalysis
/// extract. While the target month runs (and the new seasonal forecast is
/// in, from the 7th) the partial extract is refreshed; early next month it
/// still improves the forecast until the full month supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialAction {
    Fetch,
    Remove,
    Leave,
}

pub fn partial_action(variable_month: u32, current_month: u32, day: u32) -> PartialAction {
    let following = if variable_month == 12 {
        1
    } else {
        variable_month + 1
    };
    if current_month == variable_month && day > 6 {
        PartialAction::Fetch
    } else if current_month == following {
        if day < 7 {
            PartialAction::Fetch
        } else {
            PartialAction::Remove
        }
    } else {
        PartialAction::Leave
    }
}

/// Drop a stale partial extract; missing files are fine.
pub fn remove_stale_partial(
    grids_dir: &Path,
    source: GridSource,
    variable: &str,
    year: i32,
    month: u32,
) -> Result<()> {
    let path = grids_dir.join(grid_file_name(source, variable, year, month, true));
    if path.is_file() {
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }

    Ok(())
}

// -- Tests -------------------------------------------------------------------
