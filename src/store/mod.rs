//! Handles serialising and saving pipeline artifacts to disk.

pub mod forecast_log;
pub mod gridded;
pub mod predictor_table;
pub mod series;

use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};

// Date32 columns count days since the Unix epoch.
fn epoch_offset() -> i32 {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().num_days_from_ce()
}

pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - epoch_offset()
}

pub(crate) fn days_to_date(days: i32) -> Result<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + epoch_offset())
        .ok_or_else(|| anyhow!("day count {} out of range", days))
}
